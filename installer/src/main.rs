fn usage() -> ! {
    eprintln!("Usage: sp-installer --params <file.toml> [--settings <file.toml>] [--quiet]");
    std::process::exit(2);
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Accepts both `--flag value` and `--flag=value`.
    let value_of = |flag: &str| -> Option<String> {
        let prefix = format!("{}=", flag);
        args.iter().enumerate().find_map(|(i, a)| {
            if a == flag {
                args.get(i + 1).cloned()
            } else {
                a.strip_prefix(&prefix).map(str::to_string)
            }
        })
    };

    if args.iter().any(|a| a == "--help" || a == "-h") {
        usage();
    }

    let Some(params) = value_of("--params").filter(|v| !v.trim().is_empty()) else {
        usage();
    };
    let settings = value_of("--settings").filter(|v| !v.trim().is_empty());
    let quiet = args.iter().any(|a| a == "--quiet");

    let code = sp_installer::run_cli(
        std::path::Path::new(&params),
        settings.as_deref().map(std::path::Path::new),
        quiet,
    );
    std::process::exit(code);
}
