//! Command-line arguments shared by the `sender` and `receiver` binaries.
//!
//! Both take the same shape: `[-f FILE] HOSTNAME PORT`.  The sender reads
//! `FILE` (or stdin) and sends to `HOSTNAME:PORT`; the receiver binds
//! `HOSTNAME:PORT` and writes to `FILE` (or stdout).

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// File to send (sender) or to write received data to (receiver).
    /// Defaults to stdin / stdout.
    #[arg(short = 'f', value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Host name or IP address (IPv4 or IPv6).
    pub hostname: String,

    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_only() {
        let args = Args::try_parse_from(["sender", "::1", "12345"]).unwrap();
        assert_eq!(args.hostname, "::1");
        assert_eq!(args.port, 12345);
        assert!(args.file.is_none());
    }

    #[test]
    fn file_flag_before_positionals() {
        let args = Args::try_parse_from(["receiver", "-f", "out.bin", "localhost", "9000"]).unwrap();
        assert_eq!(args.file, Some(PathBuf::from("out.bin")));
        assert_eq!(args.hostname, "localhost");
    }

    #[test]
    fn wrong_token_count_is_rejected() {
        assert!(Args::try_parse_from(["sender", "localhost"]).is_err());
        assert!(Args::try_parse_from(["sender", "localhost", "1", "extra"]).is_err());
        assert!(Args::try_parse_from(["sender", "localhost", "not-a-port"]).is_err());
    }
}
