//! ffmpeg-backed decoding.
//!
//! Track discovery runs `ffprobe`; decoding spawns `ffmpeg` writing interleaved 16-bit PCM to a
//! pipe. A reader thread slices the pipe into frames and hands them over a bounded channel so
//! the pipeline can wait with a timeout and stay responsive to cancellation.
//!
//! Binaries are discovered in standard installation locations before falling back to PATH
//! search, so ffmpeg is found even when running with a limited PATH.

use super::{Decoder, Source};
use crate::waveform::{ExtractError, Frame, FramePoll, TrackInfo};
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Frames buffered between the pipe reader and the pipeline.
const CHANNEL_DEPTH: usize = 8;

/// Most recent ffmpeg diagnostics kept for error reports, in bytes.
const STDERR_TAIL_BYTES: usize = 4096;

/// Locations of the ffmpeg and ffprobe binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl FfmpegTools {
    /// Uses explicit paths where given and discovers the rest.
    pub fn locate(ffmpeg: Option<&Path>, ffprobe: Option<&Path>) -> Result<Self> {
        let ffmpeg = match ffmpeg {
            Some(path) => path.to_path_buf(),
            None => find_tool("ffmpeg")?,
        };
        let ffprobe = match ffprobe {
            Some(path) => path.to_path_buf(),
            None => find_tool("ffprobe")?,
        };
        Ok(Self { ffmpeg, ffprobe })
    }
}

/// Locates an ffmpeg suite binary (`ffmpeg`, `ffprobe`) on the system.
///
/// Checks in this order:
/// 1. macOS homebrew locations: `/opt/homebrew/bin`, `/usr/local/bin`
/// 2. Linux standard locations: `/usr/bin`, `/usr/local/bin`, `/snap/bin`
/// 3. Windows standard locations: `C:\ffmpeg\bin`
/// 4. Falls back to PATH search via `which` or `where` command
pub fn find_tool(name: &str) -> Result<PathBuf> {
    let dirs: &[&str] = if cfg!(target_os = "macos") {
        &["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"]
    } else if cfg!(target_os = "linux") {
        &["/usr/bin", "/usr/local/bin", "/snap/bin"]
    } else if cfg!(target_os = "windows") {
        &[
            "C:\\ffmpeg\\bin",
            "C:\\Program Files\\ffmpeg\\bin",
            "C:\\Program Files (x86)\\ffmpeg\\bin",
        ]
    } else {
        &[]
    };
    let file_name = if cfg!(target_os = "windows") {
        format!("{name}.exe")
    } else {
        name.to_string()
    };

    for dir in dirs {
        let path = Path::new(dir).join(&file_name);
        if path.exists() {
            tracing::debug!("Found {} at: {}", name, path.display());
            return Ok(path);
        }
    }

    let path = find_in_path(name)?;
    tracing::debug!("Found {} in PATH at: {}", name, path.display());
    Ok(path)
}

/// Searches for a binary in the system PATH.
///
/// Uses `which` on Unix systems and `where` on Windows.
fn find_in_path(binary_name: &str) -> Result<PathBuf> {
    let search_cmd = if cfg!(target_os = "windows") {
        "where"
    } else {
        "which"
    };

    let output = Command::new(search_cmd)
        .arg(binary_name)
        .output()
        .map_err(|e| anyhow!("Failed to search PATH for {binary_name}: {e}"))?;

    if output.status.success() {
        let path_str = String::from_utf8_lossy(&output.stdout);
        // `where` may list several matches
        if let Some(first) = path_str.lines().next() {
            let path = PathBuf::from(first.trim());
            if !path.as_os_str().is_empty() {
                return Ok(path);
            }
        }
    }

    Err(anyhow!(
        "{binary_name} not found. Please install ffmpeg:\n\
         macOS: brew install ffmpeg\n\
         Linux: apt install ffmpeg (Debian/Ubuntu) or dnf install ffmpeg (Fedora)\n\
         Windows: Download from https://ffmpeg.org/download.html"
    ))
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    channels: Option<u16>,
    sample_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Runs ffprobe against `source` and returns its first audio track.
fn probe(ffprobe: &Path, source: &Source) -> Result<TrackInfo, ExtractError> {
    let mut cmd = Command::new(ffprobe);
    cmd.args(["-v", "error", "-select_streams", "a:0"])
        .args([
            "-show_entries",
            "stream=codec_type,channels,sample_rate,duration:format=duration",
        ])
        .args(["-of", "json"]);
    push_input(&mut cmd, source);

    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|e| ExtractError::DecodeFailure(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::error!("ffprobe failed for {}: {}", source, stderr.trim());
        return Err(ExtractError::DecodeFailure(format!(
            "ffprobe could not read {source}: {}",
            stderr.trim()
        )));
    }

    parse_probe(&String::from_utf8_lossy(&output.stdout), &source.to_string())
}

/// Extracts track info from ffprobe's JSON output.
fn parse_probe(json: &str, source: &str) -> Result<TrackInfo, ExtractError> {
    let probed: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| ExtractError::DecodeFailure(format!("unreadable ffprobe output: {e}")))?;

    let stream = probed
        .streams
        .into_iter()
        .find(|s| s.codec_type.as_deref().is_none_or(|t| t == "audio"))
        .ok_or_else(|| ExtractError::NoAudioTrack(source.to_string()))?;

    let channels = stream.channels.unwrap_or(0);
    let sample_rate = stream
        .sample_rate
        .as_deref()
        .and_then(|rate| rate.parse::<u32>().ok())
        .unwrap_or(0);
    if channels == 0 || sample_rate == 0 {
        return Err(ExtractError::NoAudioTrack(source.to_string()));
    }

    let duration = stream
        .duration
        .or_else(|| probed.format.and_then(|f| f.duration))
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0);

    Ok(TrackInfo {
        channels,
        sample_rate,
        duration,
    })
}

fn push_input(cmd: &mut Command, source: &Source) {
    cmd.arg("-i");
    match source {
        Source::File(path) => cmd.arg(path),
        Source::Url(url) => cmd.arg(url),
    };
}

enum Chunk {
    Data(Vec<u8>),
    End,
    Failed(String),
}

/// Decodes any format ffmpeg understands into 16-bit PCM frames.
pub struct FfmpegDecoder {
    track: TrackInfo,
    child: Option<Child>,
    frames: Option<Receiver<Chunk>>,
    reader: Option<JoinHandle<()>>,
    /// Last lines ffmpeg wrote to stderr
    stderr_tail: Arc<Mutex<String>>,
    stderr_reader: Option<JoinHandle<()>>,
    /// Sample frames delivered so far, drives timestamps
    delivered: u64,
    finished: bool,
}

impl FfmpegDecoder {
    /// Probes `source` and starts an ffmpeg process decoding its first audio stream.
    ///
    /// # Arguments
    /// * `tools` - Located ffmpeg and ffprobe binaries
    /// * `source` - Resolved audio source
    /// * `frame_bytes` - Target frame size; rounded down to whole sample frames
    ///
    /// # Errors
    /// - `NoAudioTrack` if ffprobe finds no audio stream
    /// - `DecodeFailure` if ffprobe fails or ffmpeg cannot be started
    pub fn open(tools: &FfmpegTools, source: &Source, frame_bytes: usize) -> Result<Self, ExtractError> {
        let track = probe(&tools.ffprobe, source)?;

        let mut cmd = Command::new(&tools.ffmpeg);
        cmd.args(["-nostdin", "-loglevel", "error"]);
        push_input(&mut cmd, source);
        cmd.args(["-map", "0:a:0", "-vn", "-f", "s16le", "-acodec", "pcm_s16le", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| ExtractError::DecodeFailure(format!("failed to start ffmpeg: {e}")))?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ExtractError::DecodeFailure(
                "ffmpeg output pipes were not captured".to_string(),
            ));
        };

        let frame_bytes = align_frame_bytes(frame_bytes, track.channels);
        let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
        let stderr_tail = Arc::new(Mutex::new(String::new()));
        let tail = Arc::clone(&stderr_tail);

        // ffmpeg blocks once a pipe fills, so stderr needs its own reader too.
        let threads = std::thread::Builder::new()
            .name("wavext-ffmpeg-reader".to_string())
            .spawn(move || pump(stdout, frame_bytes, tx))
            .and_then(|reader| {
                std::thread::Builder::new()
                    .name("wavext-ffmpeg-stderr".to_string())
                    .spawn(move || drain_stderr(stderr, &tail))
                    .map(|stderr_reader| (reader, stderr_reader))
            });
        let (reader, stderr_reader) = match threads {
            Ok(handles) => handles,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExtractError::DecodeFailure(format!(
                    "failed to start ffmpeg reader: {e}"
                )));
            }
        };

        tracing::debug!("ffmpeg decoding {} in {} byte frames", source, frame_bytes);

        Ok(Self {
            track,
            child: Some(child),
            frames: Some(rx),
            reader: Some(reader),
            stderr_tail,
            stderr_reader: Some(stderr_reader),
            delivered: 0,
            finished: false,
        })
    }

    /// Reaps ffmpeg after its output ended and reports a failed exit.
    fn check_exit(&mut self) -> Result<(), ExtractError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().map_err(ExtractError::decode)?;
        if status.success() {
            return Ok(());
        }

        self.join_stderr();
        let stderr = self.stderr_tail();
        tracing::error!("ffmpeg exited with {}: {}", status, stderr);
        Err(ExtractError::DecodeFailure(format!(
            "ffmpeg exited with {status}: {stderr}"
        )))
    }

    fn join_stderr(&mut self) {
        if let Some(handle) = self.stderr_reader.take() {
            if handle.join().is_err() {
                tracing::warn!("ffmpeg stderr reader panicked");
            }
        }
    }

    fn stderr_tail(&self) -> String {
        self.stderr_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .trim()
            .to_string()
    }

    fn frame_from_bytes(&mut self, bytes: &[u8]) -> Frame {
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let timestamp = self.delivered as f64 * self.track.sample_interval();
        self.delivered += (samples.len() / self.track.channels as usize) as u64;
        Frame::new(samples, timestamp)
    }
}

impl Decoder for FfmpegDecoder {
    fn track(&self) -> &TrackInfo {
        &self.track
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<FramePoll, ExtractError> {
        if self.finished {
            return Ok(FramePoll::EndOfStream);
        }
        let Some(frames) = self.frames.as_ref() else {
            return Ok(FramePoll::EndOfStream);
        };

        match frames.recv_timeout(timeout) {
            Ok(Chunk::Data(bytes)) => Ok(FramePoll::Ready(self.frame_from_bytes(&bytes))),
            Ok(Chunk::Failed(message)) => {
                self.finished = true;
                Err(ExtractError::DecodeFailure(format!(
                    "failed to read ffmpeg output: {message}"
                )))
            }
            Err(RecvTimeoutError::Timeout) => Ok(FramePoll::Pending),
            Ok(Chunk::End) | Err(RecvTimeoutError::Disconnected) => {
                self.finished = true;
                self.check_exit()?;
                Ok(FramePoll::EndOfStream)
            }
        }
    }

    fn close(&mut self) -> Result<(), ExtractError> {
        self.finished = true;
        // Dropping the receiver unblocks a reader waiting on a full channel.
        self.frames = None;

        let mut result = Ok(());
        if let Some(mut child) = self.child.take() {
            if !matches!(child.try_wait(), Ok(Some(_))) {
                if let Err(e) = child.kill() {
                    tracing::debug!("Failed to kill ffmpeg: {}", e);
                }
            }
            if let Err(e) = child.wait() {
                result = Err(ExtractError::DecodeFailure(format!(
                    "failed to reap ffmpeg: {e}"
                )));
            }
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                result = Err(ExtractError::DecodeFailure(
                    "ffmpeg reader thread panicked".to_string(),
                ));
            }
        }
        self.join_stderr();
        result
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Rounds `frame_bytes` down to whole interleaved 16-bit sample frames, keeping at least one.
fn align_frame_bytes(frame_bytes: usize, channels: u16) -> usize {
    let sample_frame_bytes = 2 * channels.max(1) as usize;
    (frame_bytes / sample_frame_bytes).max(1) * sample_frame_bytes
}

/// Reads ffmpeg's stdout into frames of `frame_bytes` until EOF or the receiver goes away.
fn pump<R: Read>(mut stdout: R, frame_bytes: usize, tx: SyncSender<Chunk>) {
    loop {
        let mut buf = vec![0u8; frame_bytes];
        let mut filled = 0;
        while filled < frame_bytes {
            match stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = tx.send(Chunk::Failed(e.to_string()));
                    return;
                }
            }
        }

        if filled == 0 {
            let _ = tx.send(Chunk::End);
            return;
        }

        let at_eof = filled < frame_bytes;
        buf.truncate(filled);
        if tx.send(Chunk::Data(buf)).is_err() {
            return;
        }
        if at_eof {
            let _ = tx.send(Chunk::End);
            return;
        }
    }
}

/// Logs ffmpeg's diagnostics and keeps the last [`STDERR_TAIL_BYTES`] of them in `tail`.
fn drain_stderr<R: Read>(stderr: R, tail: &Mutex<String>) {
    let mut lines = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        match lines.read_until(b'\n', &mut line) {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!("Stopped reading ffmpeg stderr: {}", e);
                return;
            }
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end();
        if text.is_empty() {
            continue;
        }
        tracing::debug!("ffmpeg: {}", text);

        let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
        if !tail.is_empty() {
            tail.push('\n');
        }
        tail.push_str(text);
        keep_tail(&mut tail, STDERR_TAIL_BYTES);
    }
}

/// Drops the front of `text` so at most `max_bytes` remain, cutting on a char boundary.
fn keep_tail(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = text.len() - max_bytes;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    text.drain(..cut);
}
