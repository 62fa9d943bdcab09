/// Command line parsing

use anyhow::{anyhow, bail, Context, Result};
use onionserve_common::{ServeMode, ServiceConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, PartialEq)]
pub enum Command {
    Help,
    Version,
    Serve(Options),
}

/// Flags given on the command line. Anything set here wins over the
/// configuration file.
#[derive(Debug, Default, PartialEq)]
pub struct Options {
    pub config: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub dev: bool,
    pub tor_binary: Option<PathBuf>,
    pub listen_timeout: Option<Duration>,
    pub verbose: bool,
}

impl Options {
    pub fn apply(&self, mut config: ServiceConfig) -> ServiceConfig {
        if let Some(path) = &self.key_path {
            config = config.with_key_path(path.clone());
        }
        if self.dev {
            config = config.with_mode(ServeMode::Dev);
        }
        if let Some(binary) = &self.tor_binary {
            config = config.with_tor_binary(binary.clone());
        }
        if let Some(timeout) = self.listen_timeout {
            config = config.with_listen_timeout(timeout);
        }
        if self.verbose {
            config.verbose = true;
            config.quiet = false;
        }
        config
    }
}

/// Parse arguments, program name excluded
pub fn parse(args: &[String]) -> Result<Command> {
    let mut options = Options::default();
    let mut args = args.iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "help" | "--help" | "-h" => return Ok(Command::Help),
            "version" | "--version" | "-V" => return Ok(Command::Version),
            "--dev" => options.dev = true,
            "--verbose" | "-v" => options.verbose = true,
            "--pk" => options.key_path = Some(value(&mut args, arg)?.into()),
            "--config" => options.config = Some(value(&mut args, arg)?.into()),
            "--tor" => options.tor_binary = Some(value(&mut args, arg)?.into()),
            "--timeout" => {
                let secs: u64 = value(&mut args, arg)?
                    .parse()
                    .with_context(|| format!("{} expects a number of seconds", arg))?;
                if secs == 0 {
                    bail!("{} must be at least one second", arg);
                }
                options.listen_timeout = Some(Duration::from_secs(secs));
            }
            other => bail!("Unknown argument: {}", other),
        }
    }

    Ok(Command::Serve(options))
}

fn value<'a>(args: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<&'a str> {
    args.next()
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{} expects a value", flag))
}

pub fn print_help() {
    println!("onionserve - serve a website as a Tor onion service");
    println!();
    println!("USAGE:");
    println!("    onionserve [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --pk PATH        Service key file (default: onion.pk, created if missing)");
    println!("    --dev            Serve on http://127.0.0.1:9090/ without Tor");
    println!("    --config FILE    Read settings from a TOML file");
    println!("    --tor PATH       Tor binary to launch (default: tor from PATH)");
    println!("    --timeout SECS   Give up publishing after SECS seconds (default: 180)");
    println!("    --verbose, -v    Debug logging and Tor output");
    println!("    help             Show this help message");
    println!("    version          Show version information");
    println!();
    println!("The site is ./index.html when present, a greeting otherwise.");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_arguments() {
        assert_eq!(parse(&[]).unwrap(), Command::Serve(Options::default()));
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(parse(&args(&["help"])).unwrap(), Command::Help);
        assert_eq!(parse(&args(&["--dev", "-h"])).unwrap(), Command::Help);
        assert_eq!(parse(&args(&["version"])).unwrap(), Command::Version);
    }

    #[test]
    fn test_flags() {
        let command = parse(&args(&[
            "--pk", "keys/site.pk", "--dev", "--timeout", "30", "--tor", "/usr/sbin/tor",
        ]))
        .unwrap();

        let Command::Serve(options) = command else {
            panic!("expected serve");
        };
        assert_eq!(options.key_path, Some(PathBuf::from("keys/site.pk")));
        assert!(options.dev);
        assert_eq!(options.listen_timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.tor_binary, Some(PathBuf::from("/usr/sbin/tor")));
    }

    #[test]
    fn test_bad_arguments() {
        assert!(parse(&args(&["--pk"])).is_err());
        assert!(parse(&args(&["--timeout", "soon"])).is_err());
        assert!(parse(&args(&["--timeout", "0"])).is_err());
        assert!(parse(&args(&["serve"])).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let options = Options {
            key_path: Some("other.pk".into()),
            dev: true,
            verbose: true,
            ..Options::default()
        };

        let config = options.apply(ServiceConfig::new());
        assert_eq!(config.mode, ServeMode::Dev);
        assert_eq!(config.key_path, PathBuf::from("other.pk"));
        assert!(config.verbose);
        assert!(!config.quiet);
        assert_eq!(config.listen_timeout(), Duration::from_secs(180));
    }
}
