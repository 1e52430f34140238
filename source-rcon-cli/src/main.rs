use crate::config::{FileConfig, Target};
use crate::format::{join_host_port, strip_formatting};
use crate::shell::{new_shell, Input};
use ansi_term::Colour::Fixed;
use clap::Parser;
use log::{debug, error, info, LevelFilter};
use proc_exit::Code;
use rpassword::prompt_password;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use source_rcon_client::r#async::Session;
use source_rcon_client::{Error, Options};
use std::fmt::{Display, Formatter};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

mod config;
mod format;
mod shell;

/// Run commands on a Source RCON server.
///
/// With no COMMAND an interactive session is started. Otherwise the arguments are joined with
/// spaces, sent as a single command, and its output is printed.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// YAML file with `host`, `port` and `password` keys [default: ~/.neb-rcon.yml]
    #[clap(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Hostname or IP address of the server [default: localhost]
    #[clap(long, env = "RCON_HOST")]
    host: Option<String>,

    /// RCON port of the server [default: 27015]
    #[clap(short, long, env = "RCON_PORT")]
    port: Option<u16>,

    /// RCON password. Prompted for when not given.
    #[clap(long, env = "RCON_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Seconds to wait for the connection to open.
    #[clap(
        long,
        value_name = "SECS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    connect_timeout: u64,

    /// Seconds to wait for each response.
    #[clap(
        long,
        value_name = "SECS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    read_timeout: u64,

    /// Print server output without stripping formatting codes.
    #[clap(long)]
    raw: bool,

    /// Read commands line by line from stdin even when attached to a terminal.
    #[clap(long)]
    no_interactive: bool,

    /// Log more detail, repeat for protocol traces.
    #[clap(short, long, parse(from_occurrences))]
    verbose: u64,

    /// Command to run instead of starting an interactive session.
    command: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ! {
    let args = Args::parse();

    if let Err(err) = TermLogger::init(
        log_level(args.verbose),
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("Logging unavailable: {}", err);
    }

    let file = match config::load(args.config.as_deref()) {
        Ok(Some((path, file))) => {
            info!("Using config file: {}", path.display());
            file
        }
        Ok(None) => FileConfig::default(),
        Err(err) => {
            error!("{}", err);
            Code::CONFIG_ERR.process_exit();
        }
    };

    let target = resolve(&args, file);
    let address = join_host_port(&target.host, target.port);

    let password = match target.password {
        Some(password) => password,
        None => match prompt_password(format!("{}'s password: ", address)) {
            Ok(password) => password,
            Err(err) => {
                error!("Could not read password: {}", err);
                Code::FAILURE.process_exit();
            }
        },
    };

    let options = Options::default()
        .connect_timeout(Duration::from_secs(args.connect_timeout))
        .read_timeout(Duration::from_secs(args.read_timeout));

    let session = match Session::dial_with(address.as_str(), &password, &options).await {
        Ok(session) => session,
        Err(Error::AuthenticationFailed) => {
            eprintln!("Invalid password.");
            Code::FAILURE.process_exit();
        }
        Err(err) => {
            error!("Connection to {} failed: {}", address, err);
            Code::FAILURE.process_exit();
        }
    };

    let code = if args.command.is_empty() {
        info!(
            "Connected to {}. Type `exit` to quit. {} {}",
            address,
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        );
        repl_loop(&session, Prompt { address }, &args).await
    } else {
        run_once(&session, &args.command.join(" "), args.raw).await
    };

    if let Err(err) = session.close().await {
        debug!("Closing the session failed: {}", err);
    }

    code.process_exit()
}

#[derive(Clone)]
struct Prompt {
    address: String,
}

impl Display for Prompt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}> ", Fixed(10).paint(self.address.as_str()))
    }
}

fn resolve(args: &Args, file: FileConfig) -> Target {
    file.overlay(args.host.clone(), args.port, args.password.clone())
}

fn log_level(verbose: u64) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

async fn run_once(session: &Session, command: &str, raw: bool) -> Code {
    match session.execute(command).await {
        Ok(output) => match print_output(&mut io::stdout(), &output, raw) {
            Ok(()) => Code::SUCCESS,
            Err(err) => {
                error!("Could not write output: {}", err);
                Code::UNKNOWN
            }
        },
        Err(err) => {
            error!("Command failed: {}", err);
            Code::FAILURE
        }
    }
}

async fn repl_loop(session: &Session, prompt: Prompt, args: &Args) -> Code {
    let (mut read, mut write) = match new_shell(prompt.to_string(), args.no_interactive) {
        Ok(shell) => shell,
        Err(err) => {
            error!("Could not start the shell: {}", err);
            return Code::FAILURE;
        }
    };

    loop {
        let line = match read.read_line().await {
            Ok(Input::Line(line)) => line,
            Ok(Input::Eof) => return Code::SUCCESS,
            Ok(Input::Interrupted) => return Code::SIGINT,
            Err(err) => {
                error!("Could not read input: {}", err);
                return Code::UNKNOWN;
            }
        };

        let command = line.trim();
        match command {
            "" => continue,
            "exit" | "quit" => return Code::SUCCESS,
            _ => {}
        }

        let written = match session.execute(command).await {
            Ok(output) => print_output(write.out(), &output, args.raw),
            Err(err) if err.is_fatal_to_session() => {
                error!("Connection lost: {}", err);
                return Code::FAILURE;
            }
            Err(err) => writeln!(write.err(), "An error occurred: {}", err),
        };

        if let Err(err) = written {
            error!("Could not write output: {}", err);
            return Code::UNKNOWN;
        }
    }
}

fn print_output(out: &mut dyn Write, output: &str, raw: bool) -> io::Result<()> {
    let text = if raw {
        output.to_string()
    } else {
        strip_formatting(output)
    };

    write!(out, "{}", text)?;
    if !text.ends_with('\n') {
        writeln!(out)?;
    }
    out.flush()
}
