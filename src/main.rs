use flix_tui::RunOptions;

const HELP: &str = "flix-tui - Browse and play a remote video library from the terminal.

  --version, -V          Show version and exit
  --help,    -h          Show this help message
  --server <url>         Use this media server for this run
  --set-server <url>     Save the media server URL to the config file and exit
  --print-config         Print the effective configuration and exit
  --demo                 Browse a built-in sample library

Set FLIX_TUI_LOG=<file> to write logs, FLIX_TUI_LOG_LEVEL to filter them.";

enum Command {
    Exit,
    Run(RunOptions),
}

fn main() {
    let command = match parse_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(err) => {
            eprintln!("error: {err}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    if let Command::Run(opts) = command {
        if let Err(err) = flix_tui::run(opts) {
            eprintln!("error: {err:?}");
            std::process::exit(1);
        }
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> anyhow::Result<Command> {
    let mut opts = RunOptions::default();
    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("flix-tui {}", flix_tui::VERSION);
                return Ok(Command::Exit);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(Command::Exit);
            }
            "--server" => {
                let url = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--server needs a URL"))?;
                opts.server = Some(url);
            }
            "--set-server" => {
                let url = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--set-server needs a URL"))?;
                let path = flix_tui::config::save_server_url(None, &url)?;
                println!("Saved server {} to {}", url.trim(), path.display());
                return Ok(Command::Exit);
            }
            "--print-config" => opts.print_config = true,
            "--demo" => opts.demo = true,
            other => {
                if let Some(url) = other.strip_prefix("--server=") {
                    opts.server = Some(url.to_string());
                } else {
                    anyhow::bail!("unknown argument {other:?}");
                }
            }
        }
    }
    Ok(Command::Run(opts))
}
