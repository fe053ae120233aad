use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::auth::SessionToken;
use crate::filter::StatusFilter;
use crate::task::TaskStatus;

fn parse_token(raw: &str) -> Result<SessionToken, String> {
    SessionToken::new(raw).ok_or_else(|| "token cannot be empty".to_string())
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskdeck",
    version,
    about = "Track short tasks against a remote task API or a local store",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    /// Config file (default: <config dir>/taskdeck/config.toml).
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for the local collection and the session token.
    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    /// Task API base URL. Overrides `api.url`.
    #[arg(long = "api", global = true)]
    pub api: Option<String>,

    /// Config override, e.g. `--set display.color=off`.
    #[arg(
        long = "set",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub overrides: Vec<KeyVal>,

    #[command(subcommand)]
    pub command: Command,
}

impl GlobalCli {
    /// `--set` pairs plus the dedicated `--api`/`--data` flags, in the order
    /// they should be applied.
    pub fn config_overrides(&self) -> Vec<(String, String)> {
        let mut overrides: Vec<(String, String)> = self
            .overrides
            .iter()
            .map(|kv| (kv.key.clone(), kv.value.clone()))
            .collect();
        if let Some(api) = &self.api {
            overrides.push(("api.url".to_string(), api.clone()));
        }
        if let Some(data) = &self.data {
            overrides.push((
                "data.location".to_string(),
                data.to_string_lossy().into_owned(),
            ));
        }
        overrides
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Exchange credentials for a session token.
    Login(Credentials),

    /// Create an account and start a session.
    Register(Credentials),

    /// Forget the stored session token.
    Logout,

    /// Show the account behind the current session.
    Whoami,

    /// Install a session token directly.
    Token {
        #[arg(value_parser = parse_token)]
        value: SessionToken,
    },

    /// List tasks, optionally filtered or grouped by status.
    List {
        #[arg(long = "query")]
        query: Option<String>,

        #[arg(
            short = 's',
            long = "status",
            default_value = "all",
            value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<StatusFilter>())
        )]
        status: StatusFilter,

        /// Board view: one section per status.
        #[arg(short = 'g', long = "group")]
        group: bool,
    },

    Show { id: String },

    Add {
        title: String,

        #[arg(short = 'd', long = "description")]
        description: String,

        /// YYYY-MM-DD, an RFC 3339 timestamp, today, tomorrow or yesterday.
        #[arg(long = "due")]
        due: Option<String>,

        #[arg(
            long = "status",
            value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<TaskStatus>())
        )]
        status: Option<TaskStatus>,
    },

    Edit {
        id: String,

        #[arg(long = "title")]
        title: Option<String>,

        #[arg(short = 'd', long = "description")]
        description: Option<String>,

        #[arg(long = "due", conflicts_with = "clear_due")]
        due: Option<String>,

        #[arg(long = "clear-due")]
        clear_due: bool,

        #[arg(
            long = "status",
            value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<TaskStatus>())
        )]
        status: Option<TaskStatus>,
    },

    /// Mark a task completed.
    Done { id: String },

    Delete { id: String },

    /// Feed each query through the search box as if typed in sequence and
    /// print the settled view.
    Search {
        #[arg(required = true)]
        queries: Vec<String>,

        #[arg(
            short = 's',
            long = "status",
            default_value = "all",
            value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<StatusFilter>())
        )]
        status: StatusFilter,
    },
}

#[derive(clap::Args, Clone)]
pub struct Credentials {
    pub username: String,

    /// Read from stdin when omitted.
    #[arg(long = "password")]
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Command, GlobalCli};
    use crate::filter::StatusFilter;
    use crate::task::TaskStatus;

    #[test]
    fn list_flags_parse() {
        let cli = GlobalCli::try_parse_from([
            "taskdeck", "list", "--status", "in-progress", "--query", "milk", "-g",
        ])
        .expect("parse list");

        match cli.command {
            Command::List {
                query,
                status,
                group,
            } => {
                assert_eq!(query.as_deref(), Some("milk"));
                assert_eq!(status, StatusFilter::Only(TaskStatus::InProgress));
                assert!(group);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_overrides_keep_order() {
        let cli = GlobalCli::try_parse_from([
            "taskdeck",
            "--set",
            "display.color=off",
            "--api",
            "http://localhost:5000",
            "-vv",
            "whoami",
        ])
        .expect("parse globals");

        assert_eq!(cli.verbose, 2);
        assert_eq!(
            cli.config_overrides(),
            vec![
                ("display.color".to_string(), "off".to_string()),
                ("api.url".to_string(), "http://localhost:5000".to_string()),
            ]
        );
    }

    #[test]
    fn token_is_redacted_in_debug_output() {
        let cli = GlobalCli::try_parse_from(["taskdeck", "token", "super-secret-token"])
            .expect("parse token");

        let rendered = format!("{:?}", cli.command);
        assert!(!rendered.contains("super-secret-token"), "{rendered}");
        match cli.command {
            Command::Token { value } => assert_eq!(value.expose(), "super-secret-token"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn blank_token_is_rejected() {
        assert!(GlobalCli::try_parse_from(["taskdeck", "token", "   "]).is_err());
    }

    #[test]
    fn edit_rejects_due_with_clear_due() {
        let parsed = GlobalCli::try_parse_from([
            "taskdeck",
            "edit",
            "42",
            "--due",
            "tomorrow",
            "--clear-due",
        ]);
        assert!(parsed.is_err());
    }
}
