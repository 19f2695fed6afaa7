use crate::{cli::OutputFormat, error::Result};
#[cfg(feature = "colored-output")]
use colored::*;
use humansize::{BINARY, format_size};
use serde::Serialize;
#[cfg(feature = "table-output")]
use std::borrow::Cow;
#[cfg(feature = "table-output")]
use tabled::{Table, Tabled, settings::Style};
use vidstash::{DownloadOptions, DownloadRecord, StreamDescriptor};

pub struct OutputManager {
    colored: bool,
}

impl OutputManager {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }

    pub fn format_options(&self, options: &DownloadOptions, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Pretty => Ok(self.format_options_pretty(options)),
            OutputFormat::Json => Self::to_json(options, true),
            OutputFormat::JsonCompact => Self::to_json(options, false),
            #[cfg(feature = "table-output")]
            OutputFormat::Table => Ok(self.format_options_table(options)),
            #[cfg(not(feature = "table-output"))]
            OutputFormat::Table => Ok(self.format_options_pretty(options)),
        }
    }

    pub fn format_records(&self, records: &[DownloadRecord], format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Pretty => Ok(self.format_records_pretty(records)),
            OutputFormat::Json => Self::to_json(records, true),
            OutputFormat::JsonCompact => Self::to_json(records, false),
            #[cfg(feature = "table-output")]
            OutputFormat::Table => Ok(self.format_records_table(records)),
            #[cfg(not(feature = "table-output"))]
            OutputFormat::Table => Ok(self.format_records_pretty(records)),
        }
    }

    pub fn to_json<T: Serialize + ?Sized>(value: &T, pretty: bool) -> Result<String> {
        if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(Into::into)
    }

    fn format_options_pretty(&self, options: &DownloadOptions) -> String {
        let metadata = &options.metadata;
        let mut output = String::new();

        output.push_str(&format!(
            "{} {}\n",
            self.colorize("Title:", Color::Green, true),
            self.colorize(&options.title, Color::Cyan, false)
        ));
        output.push_str(&format!(
            "{} {}\n",
            self.colorize("Id:", Color::Green, false),
            options.video_id
        ));
        output.push_str(&format!(
            "{} {}\n",
            self.colorize("Thumbnail:", Color::Green, false),
            self.colorize(&metadata.thumbnail_url, Color::Blue, false)
        ));

        output.push_str(&format!("\n{}\n", self.colorize("Video streams:", Color::Yellow, true)));
        if metadata.video_streams.is_empty() {
            output.push_str("  (none compatible)\n");
        }
        for (i, stream) in metadata.video_streams.iter().enumerate() {
            output.push_str(&self.stream_line(i, stream));
        }

        output.push_str(&format!("\n{}\n", self.colorize("Audio streams:", Color::Yellow, true)));
        if metadata.audio_streams.is_empty() {
            output.push_str("  (none compatible)\n");
        }
        for (i, stream) in metadata.audio_streams.iter().enumerate() {
            output.push_str(&self.stream_line(i, stream));
        }
        output
    }

    fn stream_line(&self, index: usize, stream: &dyn StreamDescriptor) -> String {
        format!(
            "  [{}] {} {} {} ({})\n",
            index,
            self.colorize(stream.quality(), Color::Cyan, false),
            stream.format(),
            stream.codec().unwrap_or("-"),
            stream.mime_type()
        )
    }

    fn format_records_pretty(&self, records: &[DownloadRecord]) -> String {
        if records.is_empty() {
            return "No downloads yet.\n".to_owned();
        }

        let mut output = String::new();
        for record in records {
            output.push_str(&format!(
                "{}  {}  {}\n",
                self.colorize(&record.id, Color::Yellow, true),
                self.colorize(&record.title, Color::Cyan, false),
                format_size(record.size_on_disk, BINARY)
            ));
        }
        output
    }

    #[cfg(feature = "table-output")]
    fn format_options_table(&self, options: &DownloadOptions) -> String {
        #[derive(Tabled)]
        struct StreamRow<'a> {
            kind: &'static str,
            index: usize,
            quality: &'a str,
            format: &'a str,
            codec: &'a str,
            mime_type: &'a str,
        }

        fn row<'a>(kind: &'static str, index: usize, stream: &'a dyn StreamDescriptor) -> StreamRow<'a> {
            StreamRow {
                kind,
                index,
                quality: stream.quality(),
                format: stream.format(),
                codec: stream.codec().unwrap_or("-"),
                mime_type: stream.mime_type(),
            }
        }

        let metadata = &options.metadata;
        let rows: Vec<StreamRow> = metadata
            .video_streams
            .iter()
            .enumerate()
            .map(|(i, s)| row("video", i, s))
            .chain(
                metadata
                    .audio_streams
                    .iter()
                    .enumerate()
                    .map(|(i, s)| row("audio", i, s)),
            )
            .collect();

        format!(
            "{}\n{}\n",
            self.colorize(&options.title, Color::Green, true),
            Table::new(rows).with(Style::rounded())
        )
    }

    #[cfg(feature = "table-output")]
    fn format_records_table(&self, records: &[DownloadRecord]) -> String {
        #[derive(Tabled)]
        struct RecordRow<'a> {
            id: &'a str,
            title: &'a str,
            video: &'a str,
            audio: &'a str,
            size: Cow<'a, str>,
        }

        let rows: Vec<RecordRow> = records
            .iter()
            .map(|r| RecordRow {
                id: &r.id,
                title: &r.title,
                video: &r.video_mime_type,
                audio: &r.audio_mime_type,
                size: Cow::Owned(format_size(r.size_on_disk, BINARY)),
            })
            .collect();

        Table::new(rows).with(Style::rounded()).to_string()
    }

    fn colorize(&self, text: &str, color: Color, bold: bool) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                let colored_text = match color {
                    Color::Green => text.green(),
                    Color::Yellow => text.yellow(),
                    Color::Blue => text.blue(),
                    Color::Cyan => text.cyan(),
                };
                if bold {
                    colored_text.bold().to_string()
                } else {
                    colored_text.to_string()
                }
            } else {
                text.to_string()
            }
        }

        #[cfg(not(feature = "colored-output"))]
        {
            let _ = (self.colored, color, bold);
            text.to_string()
        }
    }
}

#[derive(Clone, Copy)]
enum Color {
    Green,
    Yellow,
    Blue,
    Cyan,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use vidstash::{AudioStream, VideoMetadata, VideoStream};

    fn options() -> DownloadOptions {
        DownloadOptions {
            title: "Example".into(),
            video_id: "abc123".into(),
            metadata: VideoMetadata {
                title: "Example".into(),
                video_streams: vec![VideoStream {
                    url: "https://v".into(),
                    format: "MPEG_4".into(),
                    quality: "720p".into(),
                    codec: Some("avc1".into()),
                    mime_type: "video/mp4".into(),
                    video_only: true,
                }],
                audio_streams: vec![AudioStream {
                    url: "https://a".into(),
                    format: "M4A".into(),
                    quality: "128 kbps".into(),
                    codec: None,
                    mime_type: "audio/mp4".into(),
                }],
                thumbnail_url: "https://t".into(),
            },
        }
    }

    fn record() -> DownloadRecord {
        DownloadRecord {
            id: "abc123".into(),
            title: "Example".into(),
            video: PathBuf::from("/data/video-abc123/video.dat"),
            audio: PathBuf::from("/data/video-abc123/audio.dat"),
            thumbnail: PathBuf::from("/data/video-abc123/thumbnail.jpg"),
            video_mime_type: "video/mp4".into(),
            audio_mime_type: "audio/mp4".into(),
            size_on_disk: 2048,
        }
    }

    #[test]
    fn pretty_options_list_indices() {
        let out = OutputManager::new(false)
            .format_options(&options(), OutputFormat::Pretty)
            .unwrap();
        assert!(out.contains("Title: Example"));
        assert!(out.contains("[0] 720p MPEG_4 avc1 (video/mp4)"));
        assert!(out.contains("[0] 128 kbps M4A - (audio/mp4)"));
    }

    #[test]
    fn records_as_json() {
        let out = OutputManager::new(false)
            .format_records(&[record()], OutputFormat::JsonCompact)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value[0]["id"], "abc123");
        assert_eq!(value[0]["video_mime_type"], "video/mp4");
        assert_eq!(value[0]["size_on_disk"], 2048);
    }

    #[test]
    fn empty_listing_is_explained() {
        let out = OutputManager::new(false)
            .format_records(&[], OutputFormat::Pretty)
            .unwrap();
        assert_eq!(out, "No downloads yet.\n");
    }
}
