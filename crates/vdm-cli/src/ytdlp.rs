//! `yt-dlp` subprocess adapter: the production fetch engine behind the
//! core's `Fetcher` trait, plus playlist expansion and title lookup.
//!
//! Progress is read from machine-readable lines enabled via
//! `--progress-template`; the session checkpoint runs on every line, so a
//! pause stops draining the pipe (the child stalls once the pipe buffer
//! fills) and a cancel kills the child outright.

use std::collections::HashSet;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::bail;
use vdm_core::fetch::options::YT_CLIENTS_NO_COOKIES;
use vdm_core::fetch::{
    FetchBackend, FetchError, FetchOptions, FetchSignal, Fetcher, MediaProbe, TitleResolver,
    UrlExpander,
};
use vdm_core::platform::Platform;
use vdm_core::session::AttemptSession;

/// Emits lines like `vdm:12345/67890` (total may be `NA`).
const PROGRESS_TEMPLATE: &str =
    "download:vdm:%(progress.downloaded_bytes)s/%(progress.total_bytes,progress.total_bytes_estimate)s";

/// Lines announcing that the transfer is done and postprocessing started.
const MERGE_MARKERS: &[&str] = &["[Merger]", "[ExtractAudio]", "[VideoRemuxer]", "[VideoConvertor]"];

pub struct YtDlpFetcher {
    binary: PathBuf,
}

impl YtDlpFetcher {
    /// Locate the `yt-dlp` binary on PATH.
    pub fn discover() -> anyhow::Result<Self> {
        let exe = if cfg!(windows) { "yt-dlp.exe" } else { "yt-dlp" };
        let Some(path) = std::env::var_os("PATH") else {
            bail!("PATH is not set");
        };
        for dir in std::env::split_paths(&path) {
            let candidate = dir.join(exe);
            if candidate.is_file() {
                return Ok(Self { binary: candidate });
            }
        }
        bail!("yt-dlp not found on PATH; install it with `pip install -U yt-dlp`")
    }

    fn build_args(url: &str, options: &FetchOptions) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--no-warnings".into(),
            "--newline".into(),
            "--progress-template".into(),
            PROGRESS_TEMPLATE.into(),
            "-f".into(),
            options.format.clone(),
            "-o".into(),
            output_template(options),
            "--retries".into(),
            options.tuning.retries.to_string(),
            "--fragment-retries".into(),
            options.tuning.fragment_retries.to_string(),
            "--concurrent-fragments".into(),
            options.tuning.concurrent_fragments.to_string(),
            "--windows-filenames".into(),
            "--trim-filenames".into(),
            "180".into(),
            "--format-sort".into(),
            "res,fps,hdr:12,codec:avc1".into(),
        ];
        if let Some(chunk) = options.tuning.chunk_size {
            args.push("--http-chunk-size".into());
            args.push(chunk.to_string());
        }
        if !options.tuning.resume {
            args.push("--no-continue".into());
        }
        if options.geo_bypass {
            args.push("--geo-bypass".into());
        }
        if options.force_generic {
            args.push("--force-generic-extractor".into());
        }
        for (key, value) in &options.headers {
            args.push("--add-header".into());
            args.push(format!("{key}:{value}"));
        }
        if let Some(cookies) = &options.cookie_file {
            args.push("--cookies".into());
            args.push(cookies.to_string_lossy().into_owned());
        }
        if let Some((clients, skip)) = options.extractor.youtube_clients {
            args.push("--extractor-args".into());
            args.push(format!(
                "youtube:player_client={};player_skip={}",
                clients.join(","),
                skip.join(",")
            ));
        }
        if options.extractor.tiktok_webpage {
            args.push("--extractor-args".into());
            args.push("tiktok:webpage_download=1".into());
        }
        if options.extractor.facebook_hd {
            args.push("--extractor-args".into());
            args.push("facebook:hd=1".into());
        }
        if let Some(ffmpeg) = &options.transcoder {
            args.push("--ffmpeg-location".into());
            args.push(ffmpeg.to_string_lossy().into_owned());
        }
        if options.post.extract_audio_mp3 {
            args.push("-x".into());
            args.push("--audio-format".into());
            args.push("mp3".into());
            args.push("--audio-quality".into());
            args.push("0".into());
        } else {
            if options.post.remux_mp4 {
                args.push("--merge-output-format".into());
                args.push("mp4".into());
                args.push("--remux-video".into());
                args.push("mp4".into());
            }
            if options.post.recode_h264 {
                args.push("--recode-video".into());
                args.push("mp4".into());
                args.push("--postprocessor-args".into());
                args.push(
                    "ffmpeg:-c:v libx264 -pix_fmt yuv420p -c:a aac -b:a 192k -movflags +faststart"
                        .into(),
                );
            }
        }
        if options.post.thumbnails_jpg {
            args.push("--write-thumbnail".into());
            args.push("--convert-thumbnails".into());
            args.push("jpg".into());
        }
        args.push("--".into());
        args.push(url.into());
        args
    }

    fn attempt_native(
        &self,
        url: &str,
        options: &FetchOptions,
        session: &AttemptSession,
        on_signal: &mut dyn FnMut(FetchSignal),
    ) -> Result<(), FetchError> {
        let args = Self::build_args(url, options);
        tracing::debug!("yt-dlp {}", args.join(" "));
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FetchError::Failed(format!("failed to spawn yt-dlp: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FetchError::Failed("yt-dlp stderr not captured".into()))?;
        let stderr_tail = std::thread::spawn(move || {
            let mut tail: Vec<String> = Vec::new();
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                if tail.len() >= 20 {
                    tail.remove(0);
                }
                tail.push(line);
            }
            tail
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::Failed("yt-dlp stdout not captured".into()))?;
        let mut canceled = false;
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if session.checkpoint().is_err() {
                let _ = child.kill();
                canceled = true;
                break;
            }
            if let Some((downloaded, total)) = parse_progress(&line) {
                on_signal(FetchSignal::Downloading { downloaded, total });
            } else if MERGE_MARKERS.iter().any(|m| line.starts_with(m)) {
                on_signal(FetchSignal::Finished);
            }
        }

        let status = child
            .wait()
            .map_err(|e| FetchError::Failed(format!("failed to wait for yt-dlp: {e}")))?;
        let tail = stderr_tail.join().unwrap_or_default();
        if canceled {
            return Err(FetchError::Canceled);
        }
        if status.success() {
            Ok(())
        } else if tail.is_empty() {
            Err(FetchError::Failed(format!("yt-dlp exited with {status}")))
        } else {
            Err(FetchError::Failed(tail.join("\n")))
        }
    }

    fn attempt_instaloader(
        &self,
        url: &str,
        options: &FetchOptions,
        session: &AttemptSession,
    ) -> Result<(), FetchError> {
        let Some(shortcode) = instagram_shortcode(url) else {
            return Err(FetchError::Failed(
                "could not extract an Instagram shortcode".into(),
            ));
        };
        let mut cmd = Command::new("instaloader");
        cmd.arg("--no-captions")
            .arg("--no-metadata-json")
            .arg("--dirname-pattern")
            .arg(&options.output_dir)
            .arg("--filename-pattern")
            .arg("{shortcode}")
            .arg("--")
            .arg(format!("-{shortcode}"));
        run_to_completion(cmd, session)
    }

    fn attempt_gallery_dl(
        &self,
        url: &str,
        options: &FetchOptions,
        session: &AttemptSession,
    ) -> Result<(), FetchError> {
        let mut cmd = Command::new("gallery-dl");
        cmd.arg("--dest").arg(&options.output_dir);
        if let Some(cookies) = &options.cookie_file {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.arg("--").arg(url);
        run_to_completion(cmd, session)
    }

    /// Run `yt-dlp -J` and return the parsed metadata JSON.
    fn probe_json(
        &self,
        url: &str,
        flat: bool,
        cookie_file: Option<&Path>,
        youtube_clients: Option<(&[&str], &[&str])>,
    ) -> Result<serde_json::Value, FetchError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-J").arg("--no-warnings");
        if flat {
            cmd.arg("--flat-playlist");
        } else {
            cmd.arg("--skip-download");
        }
        if let Some(cookies) = cookie_file {
            cmd.arg("--cookies").arg(cookies);
        }
        if let Some((clients, skip)) = youtube_clients {
            cmd.arg("--extractor-args").arg(format!(
                "youtube:player_client={};player_skip={}",
                clients.join(","),
                skip.join(",")
            ));
        }
        cmd.arg("--").arg(url);

        let output = cmd
            .stdin(Stdio::null())
            .output()
            .map_err(|e| FetchError::Failed(format!("failed to spawn yt-dlp: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::Failed(
                stderr.lines().last().unwrap_or("yt-dlp probe failed").to_string(),
            ));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| FetchError::Failed(format!("unparseable yt-dlp metadata: {e}")))
    }
}

impl Fetcher for YtDlpFetcher {
    fn probe(&self, url: &str, options: &FetchOptions) -> Result<MediaProbe, FetchError> {
        let value = self.probe_json(
            url,
            false,
            options.cookie_file.as_deref(),
            options.extractor.youtube_clients,
        )?;
        Ok(MediaProbe {
            id: value.get("id").and_then(|v| v.as_str()).map(String::from),
            title: value.get("title").and_then(|v| v.as_str()).map(String::from),
        })
    }

    fn attempt(
        &self,
        url: &str,
        options: &FetchOptions,
        session: &AttemptSession,
        on_signal: &mut dyn FnMut(FetchSignal),
    ) -> Result<(), FetchError> {
        session.checkpoint()?;
        match options.backend {
            FetchBackend::Native => self.attempt_native(url, options, session, on_signal),
            FetchBackend::Instaloader => self.attempt_instaloader(url, options, session),
            FetchBackend::GalleryDl => self.attempt_gallery_dl(url, options, session),
        }
    }
}

impl UrlExpander for YtDlpFetcher {
    fn expand(&self, url: &str) -> Vec<String> {
        let value = match self.probe_json(url, true, None, Some(YT_CLIENTS_NO_COOKIES)) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("playlist expansion failed for {url}: {e}");
                return vec![url.to_string()];
            }
        };
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        collect_entries(&value, &mut seen, &mut out);
        if out.is_empty() {
            vec![url.to_string()]
        } else {
            out
        }
    }
}

impl TitleResolver for YtDlpFetcher {
    fn resolve(&self, url: &str) -> Option<String> {
        if Platform::detect(url) != Platform::YouTube {
            return None;
        }
        self.probe_json(url, false, None, Some(YT_CLIENTS_NO_COOKIES))
            .ok()?
            .get("title")
            .and_then(|v| v.as_str())
            .map(String::from)
    }
}

/// Kill the child and reap it when the session aborts; poll otherwise.
fn run_to_completion(mut cmd: Command, session: &AttemptSession) -> Result<(), FetchError> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| FetchError::Failed(format!("failed to spawn fallback backend: {e}")))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| FetchError::Failed("backend stderr not captured".into()))?;
    let stderr_tail = std::thread::spawn(move || {
        let mut tail: Vec<String> = Vec::new();
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            if tail.len() >= 10 {
                tail.remove(0);
            }
            tail.push(line);
        }
        tail
    });

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let tail = stderr_tail.join().unwrap_or_default();
                return if status.success() {
                    Ok(())
                } else if tail.is_empty() {
                    Err(FetchError::Failed(format!("backend exited with {status}")))
                } else {
                    Err(FetchError::Failed(tail.join("\n")))
                };
            }
            Ok(None) => {
                if session.checkpoint().is_err() {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stderr_tail.join();
                    return Err(FetchError::Canceled);
                }
                std::thread::sleep(Duration::from_millis(200));
            }
            Err(e) => {
                return Err(FetchError::Failed(format!("failed to poll backend: {e}")));
            }
        }
    }
}

/// Parse a `vdm:<downloaded>/<total>` progress line. Total may be `NA`.
fn parse_progress(line: &str) -> Option<(u64, Option<u64>)> {
    let rest = line.trim().strip_prefix("vdm:")?;
    let (downloaded, total) = rest.split_once('/')?;
    let downloaded = downloaded.trim().parse::<f64>().ok()? as u64;
    let total = total.trim().parse::<f64>().ok().map(|t| t as u64);
    Some((downloaded, total))
}

/// Output template: custom base wins; otherwise title + [id] so stale
/// partial cleanup can find the artifacts.
fn output_template(options: &FetchOptions) -> String {
    let base = match (&options.filename_base, options.per_item_subfolder) {
        (Some(base), true) => format!("{base}/{base}.%(ext)s"),
        (Some(base), false) => format!("{base}.%(ext)s"),
        (None, true) => "%(title).190B [%(id)s]/%(title).190B [%(id)s].%(ext)s".to_string(),
        (None, false) => "%(title)s [%(id)s].%(ext)s".to_string(),
    };
    options.output_dir.join(base).to_string_lossy().into_owned()
}

/// Flatten a (possibly nested) flat-playlist JSON into video URLs.
fn collect_entries(node: &serde_json::Value, seen: &mut HashSet<String>, out: &mut Vec<String>) {
    let Some(entries) = node.get("entries").and_then(|e| e.as_array()) else {
        return;
    };
    for entry in entries {
        if entry.get("entries").is_some() {
            collect_entries(entry, seen, out);
        } else if let Some(url) = entry_url(entry) {
            if seen.insert(url.clone()) {
                out.push(url);
            }
        }
    }
}

fn entry_url(entry: &serde_json::Value) -> Option<String> {
    if let Some(url) = entry.get("url").and_then(|v| v.as_str()) {
        if url.starts_with("http") {
            return Some(url.to_string());
        }
    }
    entry
        .get("id")
        .and_then(|v| v.as_str())
        .map(|id| format!("https://www.youtube.com/watch?v={id}"))
}

fn instagram_shortcode(url: &str) -> Option<String> {
    for marker in ["/p/", "/reel/", "/tv/"] {
        if let Some(idx) = url.find(marker) {
            let rest = &url[idx + marker.len()..];
            let code: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
                .collect();
            if !code.is_empty() {
                return Some(code);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vdm_core::config::VdmConfig;
    use vdm_core::fetch::options::{base_options, FetchEnv};
    use vdm_core::registry::QualityTier;

    fn options(per_folder: bool, name: Option<&str>) -> FetchOptions {
        let cfg = VdmConfig {
            per_item_subfolder: per_folder,
            ..VdmConfig::default()
        };
        base_options(
            Platform::YouTube,
            QualityTier::P1080,
            name,
            false,
            Path::new("/tmp/out"),
            &cfg,
            &FetchEnv::default(),
        )
    }

    #[test]
    fn progress_lines_parse() {
        assert_eq!(parse_progress("vdm:1024/4096"), Some((1024, Some(4096))));
        assert_eq!(parse_progress("vdm:1024/NA"), Some((1024, None)));
        assert_eq!(parse_progress("vdm:1536.0/4096.5"), Some((1536, Some(4096))));
        assert_eq!(parse_progress("[download] 12% of ~4MiB"), None);
        assert_eq!(parse_progress(""), None);
    }

    #[test]
    fn output_template_includes_media_id_by_default() {
        let tpl = output_template(&options(false, None));
        assert!(tpl.contains("[%(id)s]"));
        assert!(tpl.starts_with("/tmp/out"));
        assert!(tpl.ends_with(".%(ext)s"));
    }

    #[test]
    fn output_template_uses_custom_base() {
        let tpl = output_template(&options(false, Some("My Clip")));
        assert!(tpl.ends_with("My Clip.%(ext)s"));
        let tpl = output_template(&options(true, Some("My Clip")));
        assert!(tpl.contains("My Clip/My Clip.%(ext)s"));
    }

    #[test]
    fn args_reflect_option_set() {
        let mut opts = options(false, None);
        opts.tuning.resume = false;
        opts.force_generic = true;
        opts.transcoder = Some(PathBuf::from("/usr/bin/ffmpeg"));
        opts.post.remux_mp4 = true;
        let args = YtDlpFetcher::build_args("https://www.youtube.com/watch?v=abc", &opts);
        assert!(args.contains(&"--no-continue".to_string()));
        assert!(args.contains(&"--force-generic-extractor".to_string()));
        assert!(args.contains(&"--ffmpeg-location".to_string()));
        assert!(args.contains(&"--merge-output-format".to_string()));
        assert!(args
            .iter()
            .any(|a| a.starts_with("youtube:player_client=web,web_embedded")));
        assert_eq!(args.last().unwrap(), "https://www.youtube.com/watch?v=abc");
    }

    #[test]
    fn shortcodes_extracted_from_post_urls() {
        assert_eq!(
            instagram_shortcode("https://www.instagram.com/reel/Cx1_ab-9/?igsh=1"),
            Some("Cx1_ab-9".to_string())
        );
        assert_eq!(
            instagram_shortcode("https://www.instagram.com/p/ABC123/"),
            Some("ABC123".to_string())
        );
        assert_eq!(instagram_shortcode("https://www.instagram.com/someuser/"), None);
    }

    #[test]
    fn flat_playlist_entries_flatten_and_dedupe() {
        let value = json!({
            "entries": [
                {"id": "a1"},
                {"url": "https://www.youtube.com/watch?v=b2"},
                {"entries": [{"id": "c3"}, {"id": "a1"}]},
            ]
        });
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        collect_entries(&value, &mut seen, &mut out);
        assert_eq!(
            out,
            vec![
                "https://www.youtube.com/watch?v=a1",
                "https://www.youtube.com/watch?v=b2",
                "https://www.youtube.com/watch?v=c3",
            ]
        );
    }
}
