use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::request::GenerationKind;

#[derive(Parser, Debug)]
#[command(name = "narration-bridge", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Narration config file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Use a specific output device by substring match
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Use the request/response generation path instead of streaming
    #[arg(long, global = true)]
    pub legacy: bool,

    /// End a stream that sends nothing for this many milliseconds (0 disables)
    #[arg(long, global = true)]
    pub stall_timeout_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List output devices and exit
    ListDevices,

    /// Generate a narration and play it as it streams in
    Stream {
        #[arg(long, value_enum, default_value_t = KindArg::Single)]
        kind: KindArg,

        /// JSON payload forwarded as the request `data`
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Bearer token
        #[arg(long)]
        token: String,

        /// Stream endpoint (or API base URL with --legacy)
        #[arg(long)]
        endpoint: String,
    },

    /// Play an existing episode, advancing through its chapters
    Play {
        /// Episode id
        #[arg(long, conflicts_with = "share_id", required_unless_present = "share_id")]
        id: Option<i64>,

        /// Public share id
        #[arg(long)]
        share_id: Option<String>,

        /// Chapter to start from (0 = the episode itself)
        #[arg(long, default_value_t = 0)]
        child: usize,

        /// API base URL
        #[arg(long)]
        base: String,

        #[arg(long, default_value = "")]
        token: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Continue,
    Single,
    Multi,
}

impl From<KindArg> for GenerationKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Continue => GenerationKind::Continue,
            KindArg::Single => GenerationKind::NewFromSingleSeed,
            KindArg::Multi => GenerationKind::NewFromMultiSeed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stream_with_global_flags() {
        let args = Args::try_parse_from([
            "narration",
            "stream",
            "--kind",
            "multi",
            "--payload",
            r#"{"seeds":[1,2]}"#,
            "--token",
            "t",
            "--endpoint",
            "wss://x/ws",
            "--legacy",
            "--device",
            "USB",
        ])
        .unwrap();
        assert!(args.legacy);
        assert_eq!(args.device.as_deref(), Some("USB"));
        let Command::Stream { kind, payload, .. } = args.cmd else {
            panic!("expected stream");
        };
        assert_eq!(GenerationKind::from(kind), GenerationKind::NewFromMultiSeed);
        assert_eq!(payload, r#"{"seeds":[1,2]}"#);
    }

    #[test]
    fn play_needs_exactly_one_reference() {
        assert!(Args::try_parse_from(["narration", "play", "--base", "https://api"]).is_err());
        assert!(
            Args::try_parse_from([
                "narration", "play", "--base", "https://api", "--id", "1", "--share-id", "s"
            ])
            .is_err()
        );
        let args =
            Args::try_parse_from(["narration", "play", "--base", "https://api", "--share-id", "s"])
                .unwrap();
        assert!(matches!(args.cmd, Command::Play { share_id: Some(_), id: None, .. }));
    }
}
