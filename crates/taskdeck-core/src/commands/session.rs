use std::io::{
  self,
  BufRead,
  IsTerminal,
  Write
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  info,
  instrument
};

use super::App;
use crate::auth::SessionToken;
use crate::auth::client::{
  AuthClient,
  LoginOutcome
};
use crate::cli::Credentials;
use crate::error::StoreError;

#[instrument(skip(app, creds))]
pub(super) async fn cmd_login(
  app: &App,
  creds: Credentials
) -> anyhow::Result<()> {
  info!("command login");
  let client = auth_client(app)?;
  let password =
    resolve_password(creds.password)?;

  let outcome = client
    .login(&creds.username, &password)
    .await
    .context("login failed")?;
  start_session(
    app,
    outcome,
    &creds.username
  )
}

#[instrument(skip(app, creds))]
pub(super) async fn cmd_register(
  app: &App,
  creds: Credentials
) -> anyhow::Result<()> {
  info!("command register");
  let client = auth_client(app)?;
  let password =
    resolve_password(creds.password)?;

  let outcome = client
    .register(&creds.username, &password)
    .await
    .context("registration failed")?;
  start_session(
    app,
    outcome,
    &creds.username
  )
}

#[instrument(skip(app))]
pub(super) fn cmd_logout(
  app: &App
) -> anyhow::Result<()> {
  info!("command logout");
  let had_session =
    app.auth.is_authenticated();
  app.auth.logout()?;
  if had_session {
    println!("Logged out.");
  } else {
    println!("No active session.");
  }
  Ok(())
}

#[instrument(skip(app))]
pub(super) async fn cmd_whoami(
  app: &App
) -> anyhow::Result<()> {
  info!("command whoami");
  match &app.auth_client {
    | Some(client) => {
      let user = client.me(&app.auth).await?;
      println!("{}", user.username);
    }
    | None => {
      app.auth.require_session().map_err(
        StoreError::from
      )?;
      println!(
        "local session (no auth server \
         configured)"
      );
    }
  }
  Ok(())
}

#[instrument(skip(app, value))]
pub(super) fn cmd_token(
  app: &App,
  value: SessionToken
) -> anyhow::Result<()> {
  info!("command token");
  app.auth.establish(value)?;
  println!("Session token installed.");
  Ok(())
}

fn auth_client(
  app: &App
) -> anyhow::Result<&AuthClient> {
  app.auth_client.as_ref().ok_or_else(
    || {
      anyhow!(
        "no auth server configured; set \
         api.url (or auth.url), or \
         install a token with `taskdeck \
         token <value>`"
      )
    }
  )
}

fn start_session(
  app: &App,
  outcome: LoginOutcome,
  username: &str
) -> anyhow::Result<()> {
  app.auth.establish(outcome.token)?;
  let shown = outcome
    .user
    .map(|user| user.username)
    .filter(|name| !name.is_empty())
    .unwrap_or_else(|| {
      username.to_string()
    });
  println!("Logged in as {shown}.");
  Ok(())
}

fn resolve_password(
  given: Option<String>
) -> anyhow::Result<String> {
  if let Some(password) = given {
    return Ok(password);
  }

  let stdin = io::stdin();
  if stdin.is_terminal() {
    eprint!("password: ");
    io::stderr().flush()?;
  }

  let mut line = String::new();
  stdin
    .lock()
    .read_line(&mut line)
    .context(
      "failed to read password from \
       stdin"
    )?;
  let password = line
    .trim_end_matches(['\r', '\n'])
    .to_string();
  if password.is_empty() {
    return Err(anyhow!(
      "password cannot be empty"
    ));
  }
  Ok(password)
}
