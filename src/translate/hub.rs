//! Locating model files, downloading them from the model hub if needed.

use futures::StreamExt as _;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt as _;

use crate::{
    config::TranslationConfig,
    prelude::*,
    ui::{ProgressConfig, Ui},
};

/// Where model files come from.
pub enum ModelFiles {
    /// A local directory. Nothing is ever downloaded.
    Local(PathBuf),

    /// A hub repository, cached on disk after the first download.
    Hub {
        client: reqwest::Client,
        ui: Ui,
        url_prefix: String,
        cache_dir: PathBuf,
    },
}

impl ModelFiles {
    /// Choose a file source based on our config.
    pub fn new(ui: Ui, config: &TranslationConfig) -> Result<Self> {
        if let Some(dir) = &config.model_dir {
            return Ok(ModelFiles::Local(dir.to_owned()));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("cannot create HTTP client")?;
        Ok(ModelFiles::Hub {
            client,
            ui,
            url_prefix: format!(
                "{}/{}/resolve/{}",
                config.hub_endpoint.trim_end_matches('/'),
                config.repo,
                config.revision,
            ),
            cache_dir: config.resolved_cache_dir()?,
        })
    }

    /// Get a local path for a required file.
    pub async fn get(&self, filename: &str) -> Result<PathBuf> {
        self.get_optional(filename)
            .await?
            .ok_or_else(|| anyhow!("model file {filename:?} not found"))
    }

    /// Get a local path for a file, or `None` if the source doesn't have it.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_optional(&self, filename: &str) -> Result<Option<PathBuf>> {
        match self {
            ModelFiles::Local(dir) => {
                let path = dir.join(filename);
                Ok(path.is_file().then_some(path))
            }
            ModelFiles::Hub {
                client,
                ui,
                url_prefix,
                cache_dir,
            } => {
                let path = cache_dir.join(filename);
                if path.is_file() {
                    debug!(path = %path.display(), "Using cached model file");
                    return Ok(Some(path));
                }
                let url = format!("{url_prefix}/{filename}");
                download(client, ui, &url, &path).await
            }
        }
    }
}

/// Download `url` to `dest`. Returns `None` if the server says the file
/// does not exist.
#[instrument(level = "debug", skip(client, ui))]
async fn download(
    client: &reqwest::Client,
    ui: &Ui,
    url: &str,
    dest: &Path,
) -> Result<Option<PathBuf>> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("cannot fetch {url}"))?;
    if response.status() == StatusCode::NOT_FOUND {
        debug!("Model file not on hub");
        return Ok(None);
    }
    let response = response
        .error_for_status()
        .with_context(|| format!("cannot fetch {url}"))?;

    let dir = dest
        .parent()
        .ok_or_else(|| anyhow!("no parent directory for {:?}", dest))?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("cannot create cache directory {:?}", dir))?;

    // Download into a temporary file next to the destination, so an
    // interrupted download never looks like a cached file.
    let tmp = tempfile::NamedTempFile::new_in(dir)
        .context("cannot create temporary download file")?;
    let mut file = tokio::fs::File::from_std(
        tmp.reopen().context("cannot open temporary download file")?,
    );

    let file_name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let config = ProgressConfig {
        emoji: "📥",
        msg: &format!("Downloading {file_name}"),
        done_msg: &format!("Downloaded {file_name}"),
    };
    let pb = match response.content_length() {
        Some(len) => ui.new_bytes_progress_bar(&config, len),
        None => ui.new_spinner(&config),
    };

    let copied = async {
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("error while downloading {url}"))?;
            file.write_all(&chunk)
                .await
                .context("cannot write temporary download file")?;
            pb.inc(chunk.len() as u64);
        }
        file.flush()
            .await
            .context("cannot flush temporary download file")
    }
    .await;
    if let Err(err) = copied {
        pb.abandon_with_message(format!("Failed to download {file_name}"));
        return Err(err);
    }
    drop(file);
    pb.finish_using_style();

    tmp.persist(dest)
        .map_err(|err| err.error)
        .with_context(|| format!("cannot move download to {:?}", dest))?;
    info!(path = %dest.display(), "Downloaded model file");
    Ok(Some(dest.to_owned()))
}
