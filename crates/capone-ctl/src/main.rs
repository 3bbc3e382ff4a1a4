//! capone-ctl — command-line client for Capone services.

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use capone_core::cap::Capability;
use capone_core::config::Config;
use capone_core::error::Error;
use capone_core::keys::SignPublic;

mod cmd;

use cmd::Target;

const DEFAULT_DISCOVERY_PORT: u16 = 6667;

fn print_usage() {
    println!("Usage: capone-ctl <command> [options] [-- service args...]");
    println!();
    println!("Commands");
    println!("  keygen                          Generate an identity, printed as a [core] block");
    println!("  discover --address <host>       Probe a host for its services");
    println!("  query                           Show what a service port exposes");
    println!("  request --service-type <type>   Request a session, printing id + capability");
    println!("  connect --service-type <type> --session <id> --capability <cap>");
    println!("                                  Connect to a session and drive the service");
    println!("  terminate --session <id> --capability <cap>");
    println!("                                  Terminate a session");
    println!();
    println!("Options");
    println!("  --config <file>                 Client config with the identity keys");
    println!("  --address <host>                Service host");
    println!("  --port <port>                   Service port (discovery default: {DEFAULT_DISCOVERY_PORT})");
    println!("  --remote-key <hex>              Expected server identity");
    println!();
    println!("Examples:");
    println!("  capone-ctl keygen > client.toml");
    println!("  capone-ctl discover --address 192.168.0.7");
    println!("  capone-ctl request --config client.toml --address 192.168.0.7 --port 1237 \\");
    println!("      --remote-key 5c8c7d3c... --service-type exec -- ls -l");
}

struct Args {
    command: String,
    config: Option<PathBuf>,
    address: Option<String>,
    port: Option<u16>,
    remote_key: Option<String>,
    session: Option<u32>,
    capability: Option<String>,
    service_type: Option<String>,
    rest: Vec<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut raw = std::env::args().skip(1);
    let command = raw.next().ok_or("missing command")?;
    let mut args = Args {
        command,
        config: None,
        address: None,
        port: None,
        remote_key: None,
        session: None,
        capability: None,
        service_type: None,
        rest: Vec::new(),
    };

    let value = |raw: &mut dyn Iterator<Item = String>, flag: &str| {
        raw.next().ok_or(format!("{flag} requires a value"))
    };

    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--config" => args.config = Some(PathBuf::from(value(&mut raw, "--config")?)),
            "--address" => args.address = Some(value(&mut raw, "--address")?),
            "--port" => {
                args.port = Some(
                    value(&mut raw, "--port")?
                        .parse()
                        .map_err(|_| "--port must be a number".to_string())?,
                )
            }
            "--remote-key" => args.remote_key = Some(value(&mut raw, "--remote-key")?),
            "--session" => {
                args.session = Some(
                    value(&mut raw, "--session")?
                        .parse()
                        .map_err(|_| "--session must be a number".to_string())?,
                )
            }
            "--capability" => args.capability = Some(value(&mut raw, "--capability")?),
            "--service-type" => args.service_type = Some(value(&mut raw, "--service-type")?),
            "--" => {
                args.rest.extend(raw.by_ref());
            }
            other => return Err(format!("unknown option: {other}")),
        }
    }
    Ok(args)
}

impl Args {
    fn config(&self) -> Result<Config, Error> {
        let path = self
            .config
            .as_ref()
            .ok_or_else(|| Error::Config("--config is required for this command".into()))?;
        Config::load(path)
    }

    fn target(&self) -> Result<Target, Error> {
        let address = self
            .address
            .clone()
            .ok_or_else(|| Error::Invalid("--address is required".into()))?;
        let port = self
            .port
            .ok_or_else(|| Error::Invalid("--port is required".into()))?;
        let remote_hex = self
            .remote_key
            .as_ref()
            .ok_or_else(|| Error::Invalid("--remote-key is required".into()))?;
        Ok(Target {
            address,
            port,
            remote: SignPublic::from_hex(remote_hex)?,
        })
    }

    fn session(&self) -> Result<u32, Error> {
        self.session
            .ok_or_else(|| Error::Invalid("--session is required".into()))
    }

    fn capability(&self) -> Result<Capability, Error> {
        let raw = self
            .capability
            .as_ref()
            .ok_or_else(|| Error::Invalid("--capability is required".into()))?;
        Capability::from_str(raw)
    }

    fn service_type(&self) -> Result<&str, Error> {
        self.service_type
            .as_deref()
            .ok_or_else(|| Error::Invalid("--service-type is required".into()))
    }
}

async fn run(args: &Args) -> Result<(), Error> {
    match args.command.as_str() {
        "keygen" => cmd::keygen::run(),
        "discover" => {
            let address = args
                .address
                .clone()
                .ok_or_else(|| Error::Invalid("--address is required".into()))?;
            let port = args.port.unwrap_or(DEFAULT_DISCOVERY_PORT);
            cmd::discover::run(&address, port, capone_core::channel::BLOCKLEN_DEFAULT).await
        }
        "query" => cmd::query::run(&args.config()?, &args.target()?).await,
        "request" => {
            cmd::session::request(
                &args.config()?,
                &args.target()?,
                args.service_type()?,
                &args.rest,
            )
            .await
        }
        "connect" => {
            cmd::session::connect(
                &args.config()?,
                &args.target()?,
                args.service_type()?,
                args.session()?,
                &args.capability()?,
                &args.rest,
            )
            .await
        }
        "terminate" => {
            cmd::session::terminate(
                &args.config()?,
                &args.target()?,
                args.session()?,
                &args.capability()?,
            )
            .await
        }
        other => Err(Error::Invalid(format!("unknown command '{other}'"))),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("capone-ctl: {msg}");
            print_usage();
            // Any argument-parsing failure is the generic fatal exit.
            return ExitCode::from(255);
        }
    };

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // One-line diagnostic; the exit status carries the error class.
            eprintln!("capone-ctl: {e}");
            ExitCode::from(e.code() as u8)
        }
    }
}
