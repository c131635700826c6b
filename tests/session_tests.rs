mod common;

use std::thread;
use std::time::Duration;

use common::{fast_config, scripted_device, session, MockDevice};
use hrv_link::simulation::load_trace;
use hrv_link::{
    CommandChannel, FeedMode, HistogramKind, HrvError, HrvSummary, LiveCapture, MetricKind,
    Sentinel, Session, SimulationFeeder, Stat,
};

fn approx(stat: Stat, expected: f64) -> bool {
    stat.value()
        .map(|v| (v - expected).abs() < 1e-9)
        .unwrap_or(false)
}

#[test]
fn test_button_session_collects_all_measurements() {
    let device = scripted_device();
    device.emit("Starting to monitor\r\nheartbeat 1\r\nMonitoring done!\r\n");
    let mut session = session(&device);

    let m = session.run(None, FeedMode::SingleShot).expect("session should complete");

    assert_eq!(m.rr.values(), &[1, 2, 2, 2, 4, 4], "RR histogram expansion");
    assert_eq!(m.bpm.values(), &[2, 2, 2, 2, 2], "BPM histogram expansion");
    assert_eq!(m.rmssd, 42.0);
    assert_eq!(m.sdann, 10.5);
    assert_eq!(m.hti, 33.3);
    assert_eq!(
        device.commands(),
        vec!["s1", "s2", "s3", "s4", "s5"],
        "requests must go out once each, in order"
    );

    let summary = HrvSummary::from_measurements(&m);
    assert!(approx(summary.rr.mean, 2.5), "RR mean should be 2.5");
    assert!(approx(summary.average_bpm, 2.0), "average BPM should be 2");
    assert!(summary.rr.std_dev.is_defined());
}

#[test]
fn test_single_shot_simulation_feeds_trace_first() {
    let device = scripted_device();
    device.respond("s1000", "Simulation done!\r\nMonitoring done!\r\n");
    let mut session = session(&device);

    session
        .run(Some(&[0.5, -0.25]), FeedMode::SingleShot)
        .expect("simulated session should complete");

    assert_eq!(
        device.commands(),
        vec!["s500", "s-250", "s1000", "s1", "s2", "s3", "s4", "s5"]
    );
}

#[test]
fn test_continuous_simulation_skips_simulation_done() {
    let device = scripted_device();
    device.respond("s1000", "Monitoring done!\r\n");
    let mut session = session(&device);

    let m = session
        .run(Some(&[0.3]), FeedMode::Continuous)
        .expect("continuous session should complete");
    assert_eq!(m.rr.len(), 6);
}

#[test]
fn test_stale_output_is_not_taken_as_response() {
    let device = scripted_device();
    device.emit("Starting to monitor\r\nMonitoring done!\r\n99\r\nDone hist\r\n7.0\r\n");
    let mut session = session(&device);

    let m = session.run(None, FeedMode::SingleShot).expect("session should complete");
    assert_eq!(m.rr.values(), &[1, 2, 2, 2, 4, 4]);
    assert_eq!(m.rmssd, 42.0, "stale 7.0 must have been discarded");
}

#[test]
fn test_button_wait_times_out_when_bounded() {
    let device = MockDevice::new();
    device.emit("noise\r\n");
    let mut session = session(&device);

    let err = session.wait_for_start().unwrap_err();
    assert!(matches!(err, HrvError::Timeout(_)), "got {err:?}");
}

#[test]
fn test_simulation_done_wait_is_bounded_by_retry() {
    let device = MockDevice::new();
    let mut session = session(&device);

    let err = session.wait_for_sentinel(Sentinel::SimulationDone).unwrap_err();
    assert!(matches!(err, HrvError::Timeout(_)), "got {err:?}");
}

#[test]
fn test_stop_wait_outlasts_sentinel_retry() {
    let device = MockDevice::new();
    let mut config = fast_config();
    config.button_timeout = None;
    let budget = config.line_timeout * config.sentinel_retry.max_attempts;
    let mut session = Session::new(device.channel(), config);

    let late = device.clone();
    let pusher = thread::spawn(move || {
        thread::sleep(budget * 5);
        late.emit("Monitoring done!\r\n");
    });
    session
        .wait_for_stop()
        .expect("stop wait must not give up on a silent device");
    pusher.join().unwrap();
}

#[test]
fn test_hang_up_is_fatal() {
    let device = MockDevice::new();
    device.hang_up();
    let mut session = session(&device);

    let err = session.wait_for_stop().unwrap_err();
    assert!(matches!(err, HrvError::Disconnected), "got {err:?}");
}

#[test]
fn test_bad_scalar_response_is_parse_error() {
    let device = scripted_device();
    device.respond("s4", "n/a\r\n");
    let mut session = session(&device);

    assert_eq!(session.request_scalar(MetricKind::Rmssd).unwrap().value, 42.0);
    let err = session.request_scalar(MetricKind::Sdann).unwrap_err();
    assert!(matches!(err, HrvError::ProtocolParse(_)), "got {err:?}");
}

#[test]
fn test_negative_bucket_fails_histogram() {
    let device = MockDevice::new();
    device.respond("s2", "1\r\n-2\r\nDone hist\r\n");
    let mut session = session(&device);

    let err = session.request_histogram(HistogramKind::Bpm).unwrap_err();
    assert!(matches!(err, HrvError::ProtocolParse(_)), "got {err:?}");
}

#[test]
fn test_garbled_bucket_count_fails_only_the_request() {
    let device = scripted_device();
    device.respond("s1", "0\r\n4000000000\r\nDone hist\r\n");
    let mut session = session(&device);

    let err = session.request_histogram(HistogramKind::RrIntervals).unwrap_err();
    assert!(matches!(err, HrvError::ProtocolParse(_)), "got {err:?}");
    let bpm = session.request_histogram(HistogramKind::Bpm).unwrap();
    assert_eq!(bpm.len(), 5, "the session keeps working after a bad dump");
}

#[test]
fn test_unanswered_requests_time_out() {
    let device = MockDevice::new();
    let mut session = session(&device);

    let err = session.request_histogram(HistogramKind::RrIntervals).unwrap_err();
    assert!(matches!(err, HrvError::Timeout(_)), "histogram: got {err:?}");
    let err = session.request_scalar(MetricKind::Hti).unwrap_err();
    assert!(matches!(err, HrvError::Timeout(_)), "scalar: got {err:?}");
    assert_eq!(device.commands(), vec!["s1", "s5"], "timeouts must not resend");
}

#[test]
fn test_live_capture_publishes_in_order() {
    let device = MockDevice::new();
    device.emit("0.12,71\r\n0.15,72\r\nbogus\r\n0.2,73\r\nDone data\r\n0\r\n2\r\nDone hist\r\n");
    device.respond("s3", "41.5\r\n");
    let session = session(&device);

    let (capture, stream) = LiveCapture::spawn(session).expect("spawn producer");
    let (mut session, outcome) = capture.join().expect("live capture should finish");

    assert_eq!(outcome.samples, 3);
    assert_eq!(outcome.skipped, 1, "the bogus frame is skipped");
    assert_eq!(outcome.histogram.values(), &[1, 1]);

    let samples = stream.drain();
    let indices: Vec<usize> = samples.iter().map(|s| s.index).collect();
    let bpm: Vec<f64> = samples.iter().map(|s| s.bpm).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(bpm, vec![71.0, 72.0, 73.0]);
    assert_eq!(samples[0].ecg, 0.12);
    assert!(stream.is_finished());

    // The session is usable again once the producer hands it back.
    let rmssd = session.request_scalar(MetricKind::Rmssd).unwrap();
    assert_eq!(rmssd.value, 41.5);
}

#[test]
fn test_live_samples_visible_before_capture_ends() {
    let device = MockDevice::new();
    device.emit("0.5,60\r\n");
    let mut config = fast_config();
    config.phase_idle_timeout = Some(Duration::from_secs(5));
    let session = Session::new(device.channel(), config);

    let (capture, stream) = LiveCapture::spawn(session).unwrap();
    let first = stream
        .recv_timeout(Duration::from_secs(2))
        .expect("first sample should arrive while the producer runs");
    assert_eq!(first.index, 0);
    assert_eq!(first.bpm, 60.0);
    assert!(!stream.is_finished());

    device.emit("Done data\r\n0\r\nDone hist\r\n");
    let (_, outcome) = capture.join().unwrap();
    assert_eq!(outcome.samples, 1);
    assert!(outcome.histogram.is_empty());
    assert!(stream.is_finished());
}

#[test]
fn test_live_capture_cancel() {
    let device = MockDevice::new();
    let mut config = fast_config();
    config.phase_idle_timeout = None;
    let session = Session::new(device.channel(), config);

    let (capture, stream) = LiveCapture::spawn(session).unwrap();
    thread::sleep(Duration::from_millis(20));
    capture.cancel();

    let err = capture.join().err().expect("cancelled capture must fail");
    assert!(matches!(err, HrvError::Closed), "got {err:?}");
    assert!(stream.is_finished(), "stream ends with its producer");
}

#[test]
fn test_feed_trace_from_file() {
    let trace = load_trace(
        format!("{}/tests/resource/trace.csv", env!("CARGO_MANIFEST_DIR")).as_ref(),
    )
    .expect("Failed to read trace");
    assert_eq!(trace.len(), 20, "header rows are skipped");
    assert_eq!(trace[0], -0.145);

    let device = MockDevice::new();
    let mut channel = device.channel();
    let sent = SimulationFeeder::new(FeedMode::Continuous)
        .feed(&mut channel, &trace)
        .unwrap();
    assert_eq!(sent, 21);

    let commands = device.commands();
    assert_eq!(commands[0], "s-145");
    assert_eq!(commands[8], "s-120");
    assert_eq!(commands.last().map(String::as_str), Some("s1000"));
}

#[test]
fn test_closed_channel_rejects_requests() {
    let device = scripted_device();
    let mut channel = device.channel();
    channel.close_handle().close();

    assert!(matches!(channel.send(b"s1"), Err(HrvError::Closed)));
    let mut session = Session::new(channel, fast_config());
    let err = session.request_scalar(MetricKind::Rmssd).unwrap_err();
    assert!(matches!(err, HrvError::Closed), "got {err:?}");
    assert!(device.commands().is_empty());
}
