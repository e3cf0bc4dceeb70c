//! Extraction runs: single-flight control, the decode loop, and run handles.
//!
//! An [`Extractor`] owns the busy flag for its instance. Each accepted request gets a fresh
//! cancel flag and a dedicated worker thread; the caller keeps a [`RunHandle`] to cancel,
//! watch progress, and collect the result.

use super::bucket::{bucketize, WaveformPoint};
use super::decimate::{DecimatedSeries, Ingest, MAX_SAMPLES};
use super::downmix::downmix;
use super::error::{ExtractError, FrameError};
use super::frame::{Frame, FramePoll, TrackInfo};
use super::metric::Metric;
use crate::decoder::{Decoder, DecoderBackend};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Smallest number of output points a request may ask for.
pub const MIN_POINTS: usize = 1;
/// Largest number of output points a request may ask for.
pub const MAX_POINTS: usize = 500;
/// Output points used when the caller does not choose.
pub const DEFAULT_POINTS: usize = 200;
/// Default upper bound on a single decoder poll.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// What to extract and how to reduce it.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformRequest {
    /// File path or URL of the audio source
    pub source: String,
    /// Number of output points, always within [`MIN_POINTS`]..=[`MAX_POINTS`]
    pub points: usize,
    /// Bucket reduction
    pub metric: Metric,
}

impl WaveformRequest {
    /// Builds a request, clamping `samples` into the supported point range.
    pub fn new(source: impl Into<String>, samples: i64, metric: Metric) -> Self {
        let points = samples.clamp(MIN_POINTS as i64, MAX_POINTS as i64) as usize;
        Self {
            source: source.into(),
            points,
            metric,
        }
    }

    fn validate(&self) -> Result<(), ExtractError> {
        if self.source.trim().is_empty() {
            return Err(ExtractError::InvalidInput(
                "audio source must not be empty".to_string(),
            ));
        }
        if self.source.contains('\0') {
            return Err(ExtractError::InvalidInput(
                "audio source contains a NUL byte".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resource bounds applied to every run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    /// Ceiling on retained decimated samples
    pub max_samples: usize,
    /// Upper bound on each decoder poll, keeps the loop responsive to cancellation
    pub poll_timeout: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_samples: MAX_SAMPLES,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

/// Counters gathered while decoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    /// Frames pulled from the decoder
    pub frames: u64,
    /// Frames that violated the interleaving contract and were replaced by silence
    pub malformed_frames: u64,
    /// Decimated samples retained
    pub decimated: usize,
    /// Wall-clock time of the run
    pub elapsed: Duration,
}

/// A finished waveform.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    /// Exactly `points` entries, or none if the source yielded no samples
    pub points: Vec<WaveformPoint>,
    /// True when the decimated-sample ceiling cut the source short
    pub truncated: bool,
    pub stats: RunStats,
}

/// Cloneable handle that requests cancellation of one run.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Handle to an in-flight extraction.
pub struct RunHandle {
    cancel: CancelHandle,
    progress: Arc<AtomicUsize>,
    worker: JoinHandle<Result<Waveform, ExtractError>>,
}

impl RunHandle {
    /// Requests early termination. The run ends with [`ExtractError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns a handle that can cancel this run from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Number of decimated samples collected so far.
    pub fn progress(&self) -> usize {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Blocks until the worker finishes and returns its outcome.
    pub fn wait(self) -> Result<Waveform, ExtractError> {
        self.worker.join().unwrap_or_else(|_| {
            tracing::error!("Waveform worker thread panicked");
            Err(ExtractError::DecodeFailure(
                "waveform worker thread panicked".to_string(),
            ))
        })
    }
}

/// Runs waveform extractions one at a time.
///
/// A request arriving while another run is active is rejected with [`ExtractError::Busy`].
pub struct Extractor {
    backend: Arc<dyn DecoderBackend>,
    limits: Limits,
    busy: Arc<AtomicBool>,
    current: Arc<Mutex<Option<CancelHandle>>>,
}

impl Extractor {
    /// Creates an extractor that opens sources through `backend`.
    pub fn new(backend: impl DecoderBackend + 'static, limits: Limits) -> Self {
        Self {
            backend: Arc::new(backend),
            limits,
            busy: Arc::new(AtomicBool::new(false)),
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns true while a run is in progress.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Cancels the current run, if any. Has no effect on later runs.
    pub fn cancel(&self) {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = current.as_ref() {
            tracing::info!("Cancelling current waveform extraction");
            handle.cancel();
        }
    }

    /// Starts a run on a dedicated worker thread.
    ///
    /// # Errors
    /// - `InvalidInput` if the request source is empty or malformed
    /// - `Busy` if another run is still active
    pub fn start(&self, request: WaveformRequest) -> Result<RunHandle, ExtractError> {
        request.validate()?;

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Rejected extraction of {}: already busy", request.source);
            return Err(ExtractError::Busy);
        }

        let cancel = CancelHandle(Arc::new(AtomicBool::new(false)));
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());

        let guard = BusyGuard {
            busy: Arc::clone(&self.busy),
            current: Arc::clone(&self.current),
        };
        let progress = Arc::new(AtomicUsize::new(0));
        let backend = Arc::clone(&self.backend);
        let limits = self.limits;
        let worker_cancel = cancel.clone();
        let worker_progress = Arc::clone(&progress);

        let worker = thread::Builder::new()
            .name("wavext-worker".to_string())
            .spawn(move || {
                let _guard = guard;
                run(
                    &request,
                    backend.as_ref(),
                    &limits,
                    &worker_cancel,
                    &worker_progress,
                )
            })
            .map_err(|e| {
                ExtractError::DecodeFailure(format!("failed to spawn waveform worker: {e}"))
            })?;

        Ok(RunHandle {
            cancel,
            progress,
            worker,
        })
    }

    /// Starts a run and blocks until it finishes.
    pub fn extract(&self, request: WaveformRequest) -> Result<Waveform, ExtractError> {
        self.start(request)?.wait()
    }
}

/// Releases the single-flight slot when the worker exits, on every path.
struct BusyGuard {
    busy: Arc<AtomicBool>,
    current: Arc<Mutex<Option<CancelHandle>>>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.busy.store(false, Ordering::Release);
    }
}

fn run(
    request: &WaveformRequest,
    backend: &dyn DecoderBackend,
    limits: &Limits,
    cancel: &CancelHandle,
    progress: &AtomicUsize,
) -> Result<Waveform, ExtractError> {
    let started = Instant::now();
    tracing::info!(
        "Extracting waveform: source={}, points={}, metric={}",
        request.source,
        request.points,
        request.metric
    );

    let mut decoder = backend.open(&request.source)?;
    let track = *decoder.track();
    tracing::info!(
        "Audio format: {}Hz, {} channels, metadata duration {}",
        track.sample_rate,
        track.channels,
        track
            .duration
            .map(|d| format!("{d:.2}s"))
            .unwrap_or_else(|| "unknown".to_string())
    );

    let collected = collect(decoder.as_mut(), &track, limits, cancel, progress);

    // Teardown runs on every path; its failure cannot change the outcome.
    if let Err(e) = decoder.close() {
        tracing::warn!("Failed to release decoder: {}", e);
    }

    let Collected {
        series,
        mut stats,
        truncated,
    } = collected?;
    stats.elapsed = started.elapsed();

    if series.is_empty() {
        tracing::warn!("No PCM samples decoded from {}", request.source);
        return Ok(Waveform {
            points: Vec::new(),
            truncated: false,
            stats,
        });
    }

    let points = bucketize(series.as_slice(), request.points, request.metric);

    tracing::info!(
        "Waveform ready: {} points from {} decimated samples ({} frames, {} malformed) in {:.2?}",
        points.len(),
        stats.decimated,
        stats.frames,
        stats.malformed_frames,
        stats.elapsed
    );

    Ok(Waveform {
        points,
        truncated,
        stats,
    })
}

/// What the decode loop gathered.
struct Collected {
    series: DecimatedSeries,
    stats: RunStats,
    /// The ceiling was reached and the source had more frames
    truncated: bool,
}

/// Pulls frames until end of stream, the ceiling, or cancellation.
fn collect(
    decoder: &mut dyn Decoder,
    track: &TrackInfo,
    limits: &Limits,
    cancel: &CancelHandle,
    progress: &AtomicUsize,
) -> Result<Collected, ExtractError> {
    let channels = track.channels as usize;
    let interval = track.sample_interval();
    let mut series = DecimatedSeries::with_limit(limits.max_samples);
    let mut stats = RunStats::default();
    let mut truncated = false;

    loop {
        if cancel.is_cancelled() {
            tracing::info!(
                "Waveform extraction cancelled after {} frames ({} samples kept)",
                stats.frames,
                series.len()
            );
            return Err(ExtractError::Cancelled);
        }

        let frame = match decoder.next_frame(limits.poll_timeout)? {
            FramePoll::Ready(frame) => frame,
            FramePoll::Pending => continue,
            FramePoll::EndOfStream => {
                tracing::debug!("End of stream after {} frames", stats.frames);
                break;
            }
        };
        stats.frames += 1;

        let ingest = match downmix(&frame.samples, channels) {
            Ok(mono) => series.push_frame(&mono, frame.timestamp, interval),
            Err(e) => {
                stats.malformed_frames += 1;
                degrade_frame(&mut series, &frame, &e)
            }
        };
        progress.store(series.len(), Ordering::Relaxed);

        match ingest {
            Ingest::Accepted => continue,
            Ingest::Full => truncated = has_more_frames(decoder, limits, cancel)?,
            Ingest::Dropped => truncated = true,
        }
        if truncated {
            tracing::warn!(
                "Decimated sample ceiling ({}) reached at {:.2}s; the rest of the source is ignored",
                series.limit(),
                frame.timestamp
            );
        } else {
            tracing::debug!("Source ended exactly at the decimated sample ceiling");
        }
        break;
    }

    stats.decimated = series.len();
    Ok(Collected {
        series,
        stats,
        truncated,
    })
}

/// Polls past the ceiling to tell a source that ends there from one that was cut short.
fn has_more_frames(
    decoder: &mut dyn Decoder,
    limits: &Limits,
    cancel: &CancelHandle,
) -> Result<bool, ExtractError> {
    loop {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        match decoder.next_frame(limits.poll_timeout) {
            Ok(FramePoll::Ready(_)) => return Ok(true),
            Ok(FramePoll::Pending) => continue,
            Ok(FramePoll::EndOfStream) => return Ok(false),
            Err(e) => {
                tracing::warn!("Decoder failed past the sample ceiling: {}", e);
                return Ok(true);
            }
        }
    }
}

/// Replaces a malformed frame with one silent sample at its timestamp.
fn degrade_frame(series: &mut DecimatedSeries, frame: &Frame, err: &FrameError) -> Ingest {
    tracing::warn!("Replacing frame at {:.3}s with silence: {}", frame.timestamp, err);
    series.push_silence(frame.timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::VecDeque;

    enum Step {
        Frame(Frame),
        Pending,
        Fail(&'static str),
    }

    struct ScriptedDecoder {
        track: TrackInfo,
        steps: VecDeque<Step>,
        endless: bool,
        closed: Arc<AtomicBool>,
    }

    impl Decoder for ScriptedDecoder {
        fn track(&self) -> &TrackInfo {
            &self.track
        }

        fn next_frame(&mut self, _timeout: Duration) -> Result<FramePoll, ExtractError> {
            if self.endless {
                thread::sleep(Duration::from_millis(1));
                return Ok(FramePoll::Ready(Frame::new(vec![1000; 64], 0.0)));
            }
            match self.steps.pop_front() {
                Some(Step::Frame(frame)) => Ok(FramePoll::Ready(frame)),
                Some(Step::Pending) => Ok(FramePoll::Pending),
                Some(Step::Fail(msg)) => Err(ExtractError::DecodeFailure(msg.to_string())),
                None => Ok(FramePoll::EndOfStream),
            }
        }

        fn close(&mut self) -> Result<(), ExtractError> {
            self.closed.store(true, Ordering::SeqCst);
            Err(ExtractError::DecodeFailure("close always fails here".to_string()))
        }
    }

    /// Picks a script by source name.
    struct TestBackend {
        closed: Arc<AtomicBool>,
    }

    impl TestBackend {
        fn new() -> (Self, Arc<AtomicBool>) {
            let closed = Arc::new(AtomicBool::new(false));
            (
                Self {
                    closed: Arc::clone(&closed),
                },
                closed,
            )
        }
    }

    fn mono(rate: u32) -> TrackInfo {
        TrackInfo {
            channels: 1,
            sample_rate: rate,
            duration: None,
        }
    }

    /// One second of constant mono signal at 8 kHz, split into 10 frames.
    fn constant_second(magnitude: i16) -> VecDeque<Step> {
        (0..10)
            .map(|k| Step::Frame(Frame::new(vec![magnitude; 800], k as f64 * 0.1)))
            .collect()
    }

    impl DecoderBackend for TestBackend {
        fn open(&self, source: &str) -> Result<Box<dyn Decoder>, ExtractError> {
            let (track, steps, endless) = match source {
                "constant" => (mono(8000), constant_second(16384), false),
                "endless" => (mono(8000), VecDeque::new(), true),
                "empty" => (mono(8000), VecDeque::new(), false),
                "pending" => {
                    let mut steps = VecDeque::from([Step::Pending, Step::Pending]);
                    steps.extend(constant_second(16384));
                    (mono(8000), steps, false)
                }
                "broken" => {
                    let mut steps = constant_second(100);
                    steps.push_back(Step::Fail("corrupt packet"));
                    (mono(8000), steps, false)
                }
                "malformed" => {
                    let track = TrackInfo {
                        channels: 2,
                        sample_rate: 100,
                        duration: Some(1.0),
                    };
                    let steps = VecDeque::from([
                        Step::Frame(Frame::new(vec![20000; 100], 0.0)),
                        Step::Frame(Frame::new(vec![20000; 3], 0.5)),
                        Step::Frame(Frame::new(vec![20000; 100], 0.6)),
                    ]);
                    (track, steps, false)
                }
                "long" => {
                    let steps = (0..50)
                        .map(|k| Step::Frame(Frame::new(vec![8000; 1000], k as f64 * 0.125)))
                        .collect();
                    (mono(8000), steps, false)
                }
                "video-only" => return Err(ExtractError::NoAudioTrack(source.to_string())),
                other => return Err(ExtractError::InvalidInput(other.to_string())),
            };
            Ok(Box::new(ScriptedDecoder {
                track,
                steps,
                endless,
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    fn extractor() -> (Extractor, Arc<AtomicBool>) {
        let (backend, closed) = TestBackend::new();
        (Extractor::new(backend, Limits::default()), closed)
    }

    fn wait_for_progress(handle: &RunHandle) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.progress() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(handle.progress() > 0, "worker never produced samples");
    }

    #[test]
    fn test_request_clamps_points() {
        assert_eq!(WaveformRequest::new("a", 0, Metric::Peak).points, 1);
        assert_eq!(WaveformRequest::new("a", -40, Metric::Peak).points, 1);
        assert_eq!(WaveformRequest::new("a", 200, Metric::Peak).points, 200);
        assert_eq!(WaveformRequest::new("a", 10_000, Metric::Peak).points, 500);
    }

    #[test]
    fn test_constant_second_amplitude() {
        let (extractor, closed) = extractor();
        let waveform = extractor
            .extract(WaveformRequest::new("constant", 4, Metric::Amplitude))
            .unwrap();

        assert_eq!(waveform.points.len(), 4);
        assert!(!waveform.truncated);
        assert_eq!(waveform.stats.frames, 10);
        assert_eq!(waveform.stats.decimated, 1000);
        let expected_times = [0.125, 0.375, 0.625, 0.875];
        for (point, expected) in waveform.points.iter().zip(expected_times) {
            assert_relative_eq!(point.time, expected, epsilon = 1e-3);
            assert_relative_eq!(point.value, 0.500, epsilon = 1e-3);
        }
        assert!(closed.load(Ordering::SeqCst));
        assert!(!extractor.is_busy());
    }

    #[test]
    fn test_pending_polls_are_retried() {
        let (extractor, _) = extractor();
        let waveform = extractor
            .extract(WaveformRequest::new("pending", 10, Metric::Peak))
            .unwrap();
        assert_eq!(waveform.points.len(), 10);
        assert_eq!(waveform.stats.frames, 10);
    }

    #[test]
    fn test_repeated_runs_have_identical_structure() {
        let (extractor, _) = extractor();
        let first = extractor
            .extract(WaveformRequest::new("constant", 37, Metric::Rms))
            .unwrap();
        let second = extractor
            .extract(WaveformRequest::new("constant", 37, Metric::Rms))
            .unwrap();
        assert_eq!(first.points, second.points);
    }

    #[test]
    fn test_empty_stream_is_empty_success() {
        let (extractor, closed) = extractor();
        let waveform = extractor
            .extract(WaveformRequest::new("empty", 50, Metric::Amplitude))
            .unwrap();
        assert!(waveform.points.is_empty());
        assert!(!waveform.truncated);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_decode_failure_still_tears_down() {
        let (extractor, closed) = extractor();
        let result = extractor.extract(WaveformRequest::new("broken", 50, Metric::Amplitude));
        assert_eq!(
            result,
            Err(ExtractError::DecodeFailure("corrupt packet".to_string()))
        );
        assert!(closed.load(Ordering::SeqCst));
        assert!(!extractor.is_busy());
    }

    #[test]
    fn test_missing_audio_track() {
        let (extractor, _) = extractor();
        let result = extractor.extract(WaveformRequest::new("video-only", 50, Metric::Amplitude));
        assert!(matches!(result, Err(ExtractError::NoAudioTrack(_))));
        assert!(!extractor.is_busy());
    }

    #[test]
    fn test_empty_source_is_rejected_without_a_run() {
        let (extractor, _) = extractor();
        let result = extractor.start(WaveformRequest::new("   ", 50, Metric::Amplitude));
        assert!(matches!(result, Err(ExtractError::InvalidInput(_))));
        assert!(!extractor.is_busy());
    }

    #[test]
    fn test_malformed_frame_degrades_to_silence() {
        let (extractor, _) = extractor();
        let waveform = extractor
            .extract(WaveformRequest::new("malformed", 5, Metric::Peak))
            .unwrap();
        assert_eq!(waveform.stats.frames, 3);
        assert_eq!(waveform.stats.malformed_frames, 1);
        // 50 + 1 silent + 50
        assert_eq!(waveform.stats.decimated, 101);
        assert_eq!(waveform.points.len(), 5);
    }

    #[test]
    fn test_ceiling_truncates_but_completes() {
        let (backend, _) = TestBackend::new();
        let limits = Limits {
            max_samples: 1000,
            ..Limits::default()
        };
        let extractor = Extractor::new(backend, limits);
        let waveform = extractor
            .extract(WaveformRequest::new("long", 20, Metric::Amplitude))
            .unwrap();

        assert!(waveform.truncated);
        assert_eq!(waveform.stats.decimated, 1000);
        // 100 decimated samples per frame, so the ceiling stops the pull after 10 frames
        assert_eq!(waveform.stats.frames, 10);
        assert_eq!(waveform.points.len(), 20);
    }

    fn extractor_with_ceiling(max_samples: usize) -> Extractor {
        let (backend, _) = TestBackend::new();
        let limits = Limits {
            max_samples,
            ..Limits::default()
        };
        Extractor::new(backend, limits)
    }

    #[test]
    fn test_source_ending_at_ceiling_is_not_truncated() {
        // 10 frames of 100 decimated samples fill a 1000 sample ceiling exactly
        let waveform = extractor_with_ceiling(1000)
            .extract(WaveformRequest::new("constant", 4, Metric::Amplitude))
            .unwrap();
        assert!(!waveform.truncated);
        assert_eq!(waveform.stats.decimated, 1000);
        assert_eq!(waveform.stats.frames, 10);
    }

    #[test]
    fn test_ceiling_inside_a_frame_is_truncated() {
        let waveform = extractor_with_ceiling(950)
            .extract(WaveformRequest::new("constant", 4, Metric::Amplitude))
            .unwrap();
        assert!(waveform.truncated);
        assert_eq!(waveform.stats.decimated, 950);
        assert_eq!(waveform.stats.frames, 10);
        assert_eq!(waveform.points.len(), 4);
    }

    #[test]
    fn test_cancel_then_fresh_run_completes() {
        let (extractor, closed) = extractor();
        let handle = extractor
            .start(WaveformRequest::new("endless", 50, Metric::Amplitude))
            .unwrap();
        wait_for_progress(&handle);
        handle.cancel();
        assert_eq!(handle.wait(), Err(ExtractError::Cancelled));
        assert!(closed.load(Ordering::SeqCst));

        let waveform = extractor
            .extract(WaveformRequest::new("constant", 8, Metric::Amplitude))
            .unwrap();
        assert_eq!(waveform.points.len(), 8);
    }

    #[test]
    fn test_second_run_is_rejected_while_busy() {
        let (extractor, _) = extractor();
        let handle = extractor
            .start(WaveformRequest::new("endless", 50, Metric::Amplitude))
            .unwrap();
        assert!(extractor.is_busy());

        let second = extractor.start(WaveformRequest::new("constant", 50, Metric::Amplitude));
        assert!(matches!(second, Err(ExtractError::Busy)));

        extractor.cancel();
        assert_eq!(handle.wait(), Err(ExtractError::Cancelled));
        assert!(!extractor.is_busy());
    }

    #[test]
    fn test_extractor_cancel_without_run_is_noop() {
        let (extractor, _) = extractor();
        extractor.cancel();
        let waveform = extractor
            .extract(WaveformRequest::new("constant", 4, Metric::Amplitude))
            .unwrap();
        assert_eq!(waveform.points.len(), 4);
    }

    #[test]
    fn test_cancel_handle_outlives_run_handle_borrow() {
        let (extractor, _) = extractor();
        let handle = extractor
            .start(WaveformRequest::new("endless", 50, Metric::Amplitude))
            .unwrap();
        let canceller = handle.cancel_handle();
        let waiter = thread::spawn(move || handle.wait());
        canceller.cancel();
        assert_eq!(waiter.join().unwrap(), Err(ExtractError::Cancelled));
    }
}
