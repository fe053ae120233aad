mod session;
mod tasks;

use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use tracing::{debug, info, instrument};

use crate::auth::AuthGate;
use crate::auth::client::AuthClient;
use crate::cli::Command;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::datetime::today_in;
use crate::render::Renderer;
use crate::store::TaskStore;
use crate::sync::{Backend, HttpSyncClient, LocalSyncClient};

/// Everything a command needs, built once per invocation and passed down.
pub struct App {
    pub cfg: Config,
    pub auth: Arc<AuthGate>,
    pub auth_client: Option<AuthClient>,
    pub store: Arc<TaskStore<Backend>>,
    pub renderer: Renderer,
}

impl App {
    #[instrument(skip(cfg))]
    pub fn open(cfg: &Config) -> anyhow::Result<Self> {
        let data_dir = cfg
            .ensure_data_dir()
            .context("failed to resolve data directory")?;
        let datastore = DataStore::open(&data_dir).with_context(|| {
            format!("failed to open datastore at {}", data_dir.display())
        })?;

        let auth = Arc::new(AuthGate::persistent(datastore.clone())?);

        let backend = match &cfg.api_url {
            Some(url) => Backend::Remote(HttpSyncClient::new(url, Arc::clone(&auth))?),
            None => Backend::Local(LocalSyncClient::open(datastore)?),
        };
        let auth_client = cfg.auth_base().map(AuthClient::new).transpose()?;
        info!(mode = backend.mode(), "task backend ready");

        let store =
            Arc::new(TaskStore::new(backend, Arc::clone(&auth)).with_timezone(cfg.timezone));

        Ok(Self {
            cfg: cfg.clone(),
            auth,
            auth_client,
            store,
            renderer: Renderer::new(cfg),
        })
    }

    /// Confirms a token restored from disk before task commands use it
    /// against the remote API.
    pub async fn validate_session(&self) {
        if !self.cfg.is_remote() {
            return;
        }
        if let Some(client) = &self.auth_client {
            client.validate_restored(&self.auth).await;
        }
    }

    pub fn today(&self) -> NaiveDate {
        today_in(&self.cfg.timezone, Utc::now())
    }
}

#[instrument(skip(cfg, command))]
pub async fn dispatch(cfg: &Config, command: Command) -> anyhow::Result<()> {
    let app = App::open(cfg)?;
    debug!(?command, "dispatching command");

    if !matches!(
        command,
        Command::Login(_)
            | Command::Register(_)
            | Command::Logout
            | Command::Whoami
            | Command::Token { .. }
    ) {
        app.validate_session().await;
    }

    match command {
        Command::Login(creds) => session::cmd_login(&app, creds).await,
        Command::Register(creds) => session::cmd_register(&app, creds).await,
        Command::Logout => session::cmd_logout(&app),
        Command::Whoami => session::cmd_whoami(&app).await,
        Command::Token { value } => session::cmd_token(&app, value),
        Command::List {
            query,
            status,
            group,
        } => tasks::cmd_list(&app, query.as_deref(), status, group).await,
        Command::Show { id } => tasks::cmd_show(&app, id).await,
        Command::Add {
            title,
            description,
            due,
            status,
        } => tasks::cmd_add(&app, title, description, due, status).await,
        Command::Edit {
            id,
            title,
            description,
            due,
            clear_due,
            status,
        } => {
            let due = if clear_due { Some(None) } else { due.map(Some) };
            tasks::cmd_edit(&app, id, title, description, due, status).await
        }
        Command::Done { id } => tasks::cmd_done(&app, id).await,
        Command::Delete { id } => tasks::cmd_delete(&app, id).await,
        Command::Search { queries, status } => tasks::cmd_search(&app, queries, status).await,
    }
}
