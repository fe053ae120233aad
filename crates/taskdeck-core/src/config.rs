use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::{
  debug,
  info,
  warn
};

use crate::datetime::parse_timezone;
use crate::filter::debounce::DEFAULT_WINDOW;

pub const CONFIG_ENV: &str =
  "TASKDECK_CONFIG";
pub const API_URL_ENV: &str =
  "TASKDECK_API_URL";
pub const DATA_ENV: &str =
  "TASKDECK_DATA";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
  api:     UrlSection,
  auth:    UrlSection,
  data:    DataSection,
  search:  SearchSection,
  display: DisplaySection
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct UrlSection {
  url: Option<String>
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DataSection {
  location: Option<String>
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SearchSection {
  debounce_ms: Option<u64>
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DisplaySection {
  color:    Option<bool>,
  timezone: Option<String>
}

#[derive(Debug, Clone)]
pub struct Config {
  /// Base URL of the task API. Unset
  /// means local mode.
  pub api_url:     Option<String>,
  pub auth_url:    Option<String>,
  pub data_dir:    PathBuf,
  pub debounce:    Duration,
  pub color:       bool,
  pub timezone:    Tz,
  pub loaded_file: Option<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api_url:     None,
      auth_url:    None,
      data_dir:    default_data_dir(),
      debounce:    DEFAULT_WINDOW,
      color:       true,
      timezone:    chrono_tz::UTC,
      loaded_file: None
    }
  }
}

impl Config {
  /// Defaults, then the config file,
  /// then the environment.
  #[tracing::instrument(skip(
    config_override
  ))]
  pub fn load(
    config_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::default();

    match resolve_config_path(
      config_override
    )? {
      | Some(path) => {
        info!(config = %path.display(), "loading config");
        cfg.load_file(&path)?;
      }
      | None => {
        debug!(
          "no config file found; using \
           defaults"
        );
      }
    }

    cfg.apply_env(|key| {
      std::env::var(key).ok()
    })?;
    Ok(cfg)
  }

  pub fn from_toml_str(
    text: &str
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::default();
    cfg.merge_toml(text)?;
    Ok(cfg)
  }

  /// Environment overrides, looked up
  /// through `lookup`.
  pub fn apply_env<F>(
    &mut self,
    lookup: F
  ) -> anyhow::Result<()>
  where
    F: Fn(&str) -> Option<String>
  {
    if let Some(url) = lookup(API_URL_ENV)
    {
      debug!(url = %url, "api url from environment");
      self.set("api.url", &url)?;
    }
    if let Some(dir) = lookup(DATA_ENV) {
      debug!(dir = %dir, "data dir from environment");
      self.set("data.location", &dir)?;
    }
    Ok(())
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) -> anyhow::Result<()>
  where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (key, value) in overrides {
      debug!(key = %key, value = %value, "applying override");
      self.set(&key, &value)?;
    }
    Ok(())
  }

  pub fn set(
    &mut self,
    key: &str,
    value: &str
  ) -> anyhow::Result<()> {
    let value = value.trim();
    match key.trim() {
      | "api.url" => {
        self.api_url = non_empty(value);
      }
      | "auth.url" => {
        self.auth_url = non_empty(value);
      }
      | "data.location" => {
        if value.is_empty() {
          return Err(anyhow!(
            "data.location cannot be \
             empty"
          ));
        }
        self.data_dir =
          expand_tilde(Path::new(value));
      }
      | "search.debounce_ms" => {
        let millis = value
          .parse::<u64>()
          .with_context(|| {
            format!(
              "invalid \
               search.debounce_ms \
               {value:?}"
            )
          })?;
        self.debounce =
          Duration::from_millis(millis);
      }
      | "display.color" => {
        self.color = parse_bool(value)
          .ok_or_else(|| {
            anyhow!(
              "invalid display.color \
               {value:?}"
            )
          })?;
      }
      | "display.timezone" => {
        self.timezone =
          parse_timezone(value)?;
      }
      | other => {
        return Err(anyhow!(
          "unknown config key {other:?}"
        ));
      }
    }
    Ok(())
  }

  /// Where the auth endpoints live:
  /// `auth.url`, else `api.url`.
  #[must_use]
  pub fn auth_base(
    &self
  ) -> Option<&str> {
    self
      .auth_url
      .as_deref()
      .or(self.api_url.as_deref())
  }

  #[must_use]
  pub fn is_remote(&self) -> bool {
    self.api_url.is_some()
  }

  #[tracing::instrument(skip(self))]
  pub fn ensure_data_dir(
    &self
  ) -> anyhow::Result<PathBuf> {
    let dir = self.data_dir.clone();
    if !dir.exists() {
      info!(dir = %dir.display(), "creating data directory");
      fs::create_dir_all(&dir)
        .with_context(|| {
          format!(
            "failed to create {}",
            dir.display()
          )
        })?;
    }
    Ok(dir)
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self.merge_toml(&text).with_context(
      || {
        format!(
          "invalid config {}",
          path.display()
        )
      }
    )?;
    self.loaded_file = Some(path);
    Ok(())
  }

  fn merge_toml(
    &mut self,
    text: &str
  ) -> anyhow::Result<()> {
    let file: FileConfig =
      toml::from_str(text)?;

    if let Some(url) = file.api.url {
      self.set("api.url", &url)?;
    }
    if let Some(url) = file.auth.url {
      self.set("auth.url", &url)?;
    }
    if let Some(location) =
      file.data.location
    {
      self
        .set("data.location", &location)?;
    }
    if let Some(millis) =
      file.search.debounce_ms
    {
      self.debounce =
        Duration::from_millis(millis);
    }
    if let Some(color) =
      file.display.color
    {
      self.color = color;
    }
    if let Some(timezone) =
      file.display.timezone
    {
      self.timezone =
        parse_timezone(&timezone)?;
    }
    Ok(())
  }
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_config_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(from_env) =
    std::env::var(CONFIG_ENV)
  {
    if from_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      from_env
    )));
  }

  let Some(config_dir) =
    dirs::config_dir()
  else {
    warn!(
      "cannot determine config \
       directory"
    );
    return Ok(None);
  };
  let candidate = config_dir
    .join("taskdeck")
    .join("config.toml");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir() -> PathBuf {
  dirs::data_dir()
    .or_else(dirs::home_dir)
    .unwrap_or_else(|| {
      PathBuf::from(".")
    })
    .join("taskdeck")
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn non_empty(
  value: &str
) -> Option<String> {
  (!value.is_empty())
    .then(|| value.to_string())
}

fn parse_bool(s: &str) -> Option<bool> {
  match s
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "1" | "y" | "yes" | "on"
    | "true" => Some(true),
    | "0" | "n" | "no" | "off"
    | "false" => Some(false),
    | _ => None
  }
}
