//! # FFmpeg Backend
//!
//! Decodes source videos by running the `ffmpeg` CLI as a subprocess and reading
//! raw `rgb24` frames off its stdout. Stream geometry and frame rate come from a
//! preceding `ffprobe` call.
//!
//! ffmpeg applies the stream's display rotation while decoding, so a clip
//! tagged with a quarter turn comes out with width and height swapped. The probe
//! reports the rotated geometry to match.
//!
//! A watchdog thread enforces the decode deadline on both subprocesses: once it
//! passes, the child is killed, the blocked read returns end-of-stream and the
//! call reports [`FrameError::DecodeTimeout`]. ffprobe is also bounded by
//! [`PROBE_TIMEOUT`] when the caller gives no deadline.

use crate::video::decoder::{DecodedVideo, SourceVideo, VideoDecoder};
use crate::video::error::FrameError;
use image::RgbImage;
use parking_lot::Mutex;
use serde::Deserialize;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const PROBE_ENTRIES: &str =
    "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames:stream_tags=rotate:stream_side_data=rotation";

#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegDecoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Read geometry and frame rate of the first video stream, giving up at
    /// `deadline` or after [`PROBE_TIMEOUT`], whichever comes first.
    pub fn probe(&self, path: &Path, deadline: Option<Instant>) -> Result<SourceVideo, FrameError> {
        let started = Instant::now();
        let limit = started + PROBE_TIMEOUT;
        let deadline = deadline.map_or(limit, |d| d.min(limit));

        let mut child = Command::new(&self.ffprobe)
            .args(["-v", "error", "-select_streams", "v:0", "-show_entries", PROBE_ENTRIES])
            .args(["-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FrameError::unavailable(path, format!("failed to run ffprobe: {e}")))?;

        let (mut stdout, mut stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(FrameError::unavailable(path, "ffprobe output not captured"));
            }
        };

        let child = Arc::new(Mutex::new(child));
        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = Watchdog::spawn(Arc::clone(&child), deadline, Arc::clone(&timed_out), "ffprobe");

        let mut json = Vec::new();
        let mut errors = Vec::new();
        let read = stdout
            .read_to_end(&mut json)
            .and_then(|_| stderr.read_to_end(&mut errors));
        let status = child.lock().wait();
        drop(watchdog);

        if timed_out.load(Ordering::SeqCst) {
            return Err(FrameError::DecodeTimeout {
                path: path.to_path_buf(),
                budget: deadline.saturating_duration_since(started),
            });
        }
        read.map_err(|e| FrameError::unavailable(path, format!("reading ffprobe output: {e}")))?;
        let status = status.map_err(|e| FrameError::unavailable(path, e.to_string()))?;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&errors);
            return Err(FrameError::unavailable(
                path,
                format!("ffprobe failed: {}", stderr.trim()),
            ));
        }

        parse_probe(path, &json)
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn open(
        &self,
        path: &Path,
        deadline: Option<Instant>,
    ) -> Result<Box<dyn DecodedVideo>, FrameError> {
        if !path.is_file() {
            return Err(FrameError::unavailable(path, "file not found"));
        }

        let source = self.probe(path, deadline)?;
        debug!(
            path = %path.display(),
            fps = source.fps,
            width = source.width,
            height = source.height,
            "Probed source video"
        );

        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| FrameError::unavailable(path, format!("failed to run ffmpeg: {e}")))?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(FrameError::unavailable(path, "ffmpeg stdout not captured"));
            }
        };

        let opened_at = Instant::now();
        let child = Arc::new(Mutex::new(child));
        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = deadline.map(|deadline| {
            Watchdog::spawn(Arc::clone(&child), deadline, Arc::clone(&timed_out), "ffmpeg")
        });

        let frame_len = source.width as usize * source.height as usize * 3;
        Ok(Box::new(FfmpegStream {
            source,
            child,
            stdout,
            frame_len,
            timed_out,
            budget: deadline.map(|d| d.saturating_duration_since(opened_at)),
            finished: false,
            _watchdog: watchdog,
        }))
    }
}

struct FfmpegStream {
    source: SourceVideo,
    child: Arc<Mutex<Child>>,
    stdout: ChildStdout,
    frame_len: usize,
    timed_out: Arc<AtomicBool>,
    budget: Option<Duration>,
    finished: bool,
    _watchdog: Option<Watchdog>,
}

impl FfmpegStream {
    fn finish(&mut self) -> Result<Option<RgbImage>, FrameError> {
        self.finished = true;

        if self.timed_out.load(Ordering::SeqCst) {
            return Err(FrameError::DecodeTimeout {
                path: self.source.path.clone(),
                budget: self.budget.unwrap_or_default(),
            });
        }

        let status = self
            .child
            .lock()
            .wait()
            .map_err(|e| FrameError::unavailable(&self.source.path, e.to_string()))?;

        if status.success() {
            Ok(None)
        } else {
            Err(FrameError::unavailable(
                &self.source.path,
                format!("ffmpeg exited with {status}"),
            ))
        }
    }
}

impl DecodedVideo for FfmpegStream {
    fn source(&self) -> &SourceVideo {
        &self.source
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, FrameError> {
        if self.finished {
            return Ok(None);
        }

        let mut buffer = vec![0u8; self.frame_len];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => RgbImage::from_raw(self.source.width, self.source.height, buffer)
                .map(Some)
                .ok_or_else(|| {
                    FrameError::unavailable(&self.source.path, "decoded frame size mismatch")
                }),
            // A trailing partial frame is dropped
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => self.finish(),
            Err(e) => {
                self.finished = true;
                Err(FrameError::unavailable(
                    &self.source.path,
                    format!("reading decoded frames: {e}"),
                ))
            }
        }
    }
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        let mut child = self.child.lock();
        if let Ok(None) = child.try_wait() {
            let _ = child.kill();
        }
        let _ = child.wait();
    }
}

/// Kills the child when the deadline passes. Dropping the watchdog cancels it.
struct Watchdog {
    _cancel: mpsc::Sender<()>,
}

impl Watchdog {
    fn spawn(
        child: Arc<Mutex<Child>>,
        deadline: Instant,
        timed_out: Arc<AtomicBool>,
        program: &'static str,
    ) -> Self {
        let (cancel, cancelled) = mpsc::channel::<()>();

        thread::spawn(move || {
            let wait = deadline.saturating_duration_since(Instant::now());
            match cancelled.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {
                    timed_out.store(true, Ordering::SeqCst);
                    let mut child = child.lock();
                    if let Ok(None) = child.try_wait() {
                        warn!(program, "Decode deadline passed, killing subprocess");
                        let _ = child.kill();
                    }
                }
                // Stream finished or dropped first
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            }
        });

        Self { _cancel: cancel }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

impl ProbeStream {
    /// Display rotation in degrees. Newer ffprobe reports it as display matrix
    /// side data, older builds as a `rotate` tag.
    fn rotation(&self) -> i64 {
        self.side_data_list
            .iter()
            .find_map(|side| side.rotation)
            .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.trim().parse().ok()))
            .map_or(0, |degrees: f64| degrees.round() as i64)
    }
}

fn parse_probe(path: &Path, json: &[u8]) -> Result<SourceVideo, FrameError> {
    let probe: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| FrameError::unavailable(path, format!("unreadable ffprobe output: {e}")))?;

    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| FrameError::unavailable(path, "no video stream"))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(FrameError::unavailable(path, "video stream has no dimensions")),
    };
    let (width, height) = match stream.rotation().rem_euclid(180) {
        90 => (height, width),
        _ => (width, height),
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(0.0);

    Ok(SourceVideo {
        path: path.to_path_buf(),
        fps,
        frame_count: stream.nb_frames.as_deref().and_then(|n| n.parse().ok()),
        width,
        height,
    })
}

/// Parse an ffprobe rate such as `30000/1001` or `25`.
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("25/1"), Some(25.0));
        assert_eq!(parse_rate("30"), Some(30.0));
        let ntsc = parse_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("garbage"), None);
    }

    #[test]
    fn test_parse_probe_prefers_average_rate() {
        let json = br#"{"streams":[{"width":1920,"height":1080,"r_frame_rate":"60/1","avg_frame_rate":"30/1","nb_frames":"450"}]}"#;
        let source = parse_probe(Path::new("clip.mp4"), json).unwrap();

        assert_eq!(source.width, 1920);
        assert_eq!(source.height, 1080);
        assert_eq!(source.fps, 30.0);
        assert_eq!(source.frame_count, Some(450));
    }

    #[test]
    fn test_parse_probe_without_rate() {
        let json = br#"{"streams":[{"width":640,"height":480,"avg_frame_rate":"0/0"}]}"#;
        let source = parse_probe(Path::new("clip.mp4"), json).unwrap();
        assert_eq!(source.fps, 0.0);
        assert_eq!(source.frame_count, None);
    }

    #[test]
    fn test_parse_probe_applies_display_rotation() {
        let side_data = br#"{"streams":[{"width":1920,"height":1080,"avg_frame_rate":"30/1","side_data_list":[{"side_data_type":"Display Matrix","rotation":-90}]}]}"#;
        let source = parse_probe(Path::new("phone.mp4"), side_data).unwrap();
        assert_eq!((source.width, source.height), (1080, 1920));

        let tagged = br#"{"streams":[{"width":1920,"height":1080,"tags":{"rotate":"270"}}]}"#;
        let source = parse_probe(Path::new("phone.mp4"), tagged).unwrap();
        assert_eq!((source.width, source.height), (1080, 1920));

        let upside_down = br#"{"streams":[{"width":1920,"height":1080,"tags":{"rotate":"180"}}]}"#;
        let source = parse_probe(Path::new("phone.mp4"), upside_down).unwrap();
        assert_eq!((source.width, source.height), (1920, 1080));
    }

    #[test]
    fn test_probe_respects_deadline() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let hanging = dir.path().join("ffprobe");
        std::fs::write(&hanging, "#!/bin/sh\nexec sleep 5\n").unwrap();
        std::fs::set_permissions(&hanging, std::fs::Permissions::from_mode(0o755)).unwrap();
        let clip = dir.path().join("clip.mp4");
        std::fs::write(&clip, b"not a video").unwrap();

        let decoder = FfmpegDecoder::new("ffmpeg", hanging.clone());
        let started = Instant::now();
        let err = decoder
            .probe(&clip, Some(started + Duration::from_millis(200)))
            .unwrap_err();

        assert_eq!(err.kind(), "decode_timeout");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_parse_probe_without_video_stream() {
        let err = parse_probe(Path::new("audio.mp3"), br#"{"streams":[]}"#).unwrap_err();
        assert_eq!(err.kind(), "source_unavailable");
    }

    #[test]
    fn test_open_missing_file() {
        let decoder = FfmpegDecoder::new("ffmpeg", "ffprobe");
        let err = decoder
            .open(Path::new("/definitely/not/here.mp4"), None)
            .err()
            .unwrap();
        assert!(matches!(err, FrameError::SourceUnavailable { .. }));
    }
}
