use crate::{
    cli::OutputFormat,
    config::AppConfig,
    error::{CliError, Result},
    output::OutputManager,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vidstash::{
    CancellationToken, DownloadOptions, DownloadProgress, DownloadRecord, DownloadStore,
    Downloader, MetadataResolver, StreamSelection, create_client,
};

pub struct CommandExecutor {
    config: AppConfig,
    storage_dir: PathBuf,
    output: OutputManager,
}

impl CommandExecutor {
    pub fn new(config: AppConfig, storage_dir: Option<PathBuf>) -> Result<Self> {
        let storage_dir = match storage_dir {
            Some(dir) => dir,
            None => config.storage_dir()?,
        };
        Ok(Self {
            config,
            storage_dir,
            output: OutputManager::new(true),
        })
    }

    async fn open_store(&self) -> Result<Arc<DownloadStore>> {
        debug!(root = %self.storage_dir.display(), "Opening download store");
        Ok(Arc::new(DownloadStore::open(&self.storage_dir).await?))
    }

    async fn resolve_options(&self, url: &str) -> Result<DownloadOptions> {
        let client = create_client(&self.config.downloader_config())?;
        let resolver = MetadataResolver::new(client, self.config.resolver_config());
        Ok(resolver.resolve(url).await?)
    }

    pub async fn resolve(&self, url: &str, format: OutputFormat) -> Result<()> {
        let spinner = spinner("Fetching stream metadata...", format.is_json());
        let options = self.resolve_options(url).await;
        spinner.finish_and_clear();

        println!("{}", self.output.format_options(&options?, format)?);
        Ok(())
    }

    pub async fn download(
        &self,
        url: &str,
        video: Option<usize>,
        audio: Option<usize>,
        interactive: bool,
    ) -> Result<()> {
        let spinner = spinner("Fetching stream metadata...", false);
        let options = self.resolve_options(url).await;
        spinner.finish_and_clear();
        let options = options?;

        let selection = if interactive {
            prompt_selection(&options)?
        } else {
            StreamSelection::new(video.unwrap_or(0), audio.unwrap_or(0))
        };

        let client = create_client(&self.config.downloader_config())?;
        let downloader = Downloader::new(client, &self.config.downloader_config(), self.open_store().await?);

        let bars = MultiProgress::new();
        let video_bar = bars.add(percent_bar("video"));
        let audio_bar = bars.add(percent_bar("audio"));
        let mut on_video = |pct: u8| video_bar.set_position(u64::from(pct));
        let mut on_audio = |pct: u8| audio_bar.set_position(u64::from(pct));

        let token = CancellationToken::new();
        let ctrl_c = {
            let token = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling download");
                    token.cancel();
                }
            })
        };

        info!(title = %options.title, "Downloading");
        let result = downloader
            .download(
                &options,
                selection,
                DownloadProgress::new(&mut on_video, &mut on_audio),
                &token,
            )
            .await;
        ctrl_c.abort();

        match result {
            Ok(record) => {
                video_bar.finish();
                audio_bar.finish();
                println!(
                    "Saved `{}` as {} ({})",
                    record.title,
                    record.id,
                    humansize::format_size(record.size_on_disk, humansize::BINARY)
                );
                Ok(())
            }
            Err(e) => {
                video_bar.abandon();
                audio_bar.abandon();
                Err(e.into())
            }
        }
    }

    pub async fn list(&self, format: OutputFormat) -> Result<()> {
        let store = self.open_store().await?;
        let records = store.list().await?;
        print!("{}", self.output.format_records(&records, format)?);
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let store = self.open_store().await?;
        let record = store
            .get(id)
            .await
            .ok_or_else(|| CliError::NotFound(id.to_owned()))?;
        store.delete(&record).await?;
        println!("Deleted `{}` ({})", record.title, record.id);
        Ok(())
    }

    pub async fn play(&self, id: &str) -> Result<()> {
        let store = self.open_store().await?;
        let record = store
            .get(id)
            .await
            .ok_or_else(|| CliError::NotFound(id.to_owned()))?;
        println!("{}", OutputManager::to_json(&record.playable_source(), true)?);
        Ok(())
    }

    /// Re-list on every change until interrupted.
    ///
    /// Other processes write to the same directory, so the listing is polled
    /// and differences are fed into the store's change feed.
    pub async fn watch(&self, format: OutputFormat, interval: Duration) -> Result<()> {
        let store = self.open_store().await?;
        let mut changes = store.subscribe();
        let mut ticker = tokio::time::interval(interval);
        let mut last_seen: Option<Vec<DownloadRecord>> = None;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    debug!("Stopping watch");
                    return Ok(());
                }
                open = changes.changed() => {
                    if !open {
                        return Ok(());
                    }
                    let records = store.list().await?;
                    print!("{}", self.output.format_records(&records, format)?);
                    last_seen = Some(records);
                }
                _ = ticker.tick() => {
                    let records = store.list().await?;
                    if last_seen.as_ref().is_some_and(|seen| *seen != records) {
                        store.changes().publish();
                    }
                }
            }
        }
    }
}

fn spinner(message: &'static str, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(120));
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
        pb.set_style(style.tick_strings(&[
            "▹▹▹▹▹", "▸▹▹▹▹", "▹▸▹▹▹", "▹▹▸▹▹", "▹▹▹▸▹", "▹▹▹▹▸", "▪▪▪▪▪",
        ]));
    }
    pb.set_message(message);
    pb
}

fn percent_bar(prefix: &'static str) -> ProgressBar {
    let bar = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::with_template("{prefix:>5} [{bar:40.cyan/blue}] {pos:>3}%") {
        bar.set_style(style.progress_chars("━━╌"));
    }
    bar.set_prefix(prefix);
    bar
}

#[cfg(feature = "interactive")]
fn prompt_selection(options: &DownloadOptions) -> Result<StreamSelection> {
    use inquire::Select;
    use vidstash::StreamDescriptor;

    fn pick(prompt: &str, labels: Vec<String>) -> Result<usize> {
        if labels.is_empty() {
            return Err(CliError::InvalidInput(format!("{prompt} no compatible streams")));
        }
        Select::new(prompt, labels)
            .raw_prompt()
            .map(|choice| choice.index)
            .map_err(|e| match e {
                inquire::InquireError::OperationCanceled
                | inquire::InquireError::OperationInterrupted => CliError::Interrupted,
                other => CliError::InvalidInput(other.to_string()),
            })
    }

    fn label(stream: &dyn StreamDescriptor) -> String {
        format!(
            "{} {} {}",
            stream.quality(),
            stream.format(),
            stream.codec().unwrap_or("-")
        )
    }

    let metadata = &options.metadata;
    let video = pick(
        "Video stream:",
        metadata.video_streams.iter().map(|s| label(s)).collect(),
    )?;
    let audio = pick(
        "Audio stream:",
        metadata.audio_streams.iter().map(|s| label(s)).collect(),
    )?;
    Ok(StreamSelection::new(video, audio))
}

#[cfg(not(feature = "interactive"))]
fn prompt_selection(_options: &DownloadOptions) -> Result<StreamSelection> {
    Err(CliError::InvalidInput(
        "interactive selection is not available in this build".to_owned(),
    ))
}
