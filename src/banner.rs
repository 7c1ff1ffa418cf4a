const GREETING: &str = "Welcome to TCP-Chat!";

const LOGO: &[&str] = &[
    "         _nnnn_",
    "        dGGGGMMb",
    "       @p~qp~~qMb",
    "       M|@||@) M|",
    "       @,----.JM|",
    "      JS^\\__/  qKL",
    "     dZP        qKRb",
    "    dZP          qKKb",
    "   fZP            SMMb",
    "   HZM            MMMM",
    "   FqM            MMMM",
    " __| \".        |\\dS\"qML",
    " |    `.       | `' \\Zq",
    "_)      \\.___.,|     .'",
    "\\____   )MMMMMP|   .'",
    "     `-'       `--'",
];

/// Greeting and logo sent once the handshake succeeds, ending in a blank line.
pub fn render() -> String {
    let mut out = String::with_capacity(512);
    out.push_str(GREETING);
    out.push('\n');
    for line in LOGO {
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}
