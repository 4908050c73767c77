use anyhow::Result;
use image::Rgb;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

use rover_vision::config::PipelineSettings;
use rover_vision::detect::FixedBackend;
use rover_vision::pipeline::{DEFAULT_BOX_COLOR, FPS_COLOR};
use rover_vision::{
    BoundingBox, ControlSurface, Detection, DetectionConfig, DetectorEngine, FrameProcessor,
    PassOutcome, PipelineRunner, PipelineState, SnapshotError, SnapshotStore, StreamHub,
    SyntheticSource,
};

struct Rig {
    runner: PipelineRunner,
    state: Arc<PipelineState>,
    hub: Arc<StreamHub>,
    control: ControlSurface,
    _dir: tempfile::TempDir,
}

fn rig(source: SyntheticSource, engine: DetectorEngine) -> Result<Rig> {
    let dir = tempdir()?;
    let state = Arc::new(PipelineState::new());
    let hub = Arc::new(StreamHub::new(8));
    let snapshots = Arc::new(SnapshotStore::open(dir.path())?);
    let control = ControlSurface::new(state.clone(), hub.clone(), snapshots);
    let processor = FrameProcessor::new(Box::new(source), engine, &PipelineSettings::default());
    let runner = PipelineRunner::new(
        processor,
        state.clone(),
        hub.clone(),
        Duration::from_secs(5),
    );
    Ok(Rig {
        runner,
        state,
        hub,
        control,
        _dir: dir,
    })
}

fn black_source() -> SyntheticSource {
    SyntheticSource::solid(100, 100, Rgb([0, 0, 0]))
}

fn fixed_engine() -> DetectorEngine {
    let det = Detection::new(BoundingBox::new(10, 10, 20, 20), "test", 0.9);
    DetectorEngine::new(FixedBackend::new(vec![det]), DetectionConfig::default())
}

#[test]
fn black_frames_become_80_percent_frames_with_fps_overlay() -> Result<()> {
    let mut rig = rig(black_source(), DetectorEngine::disabled())?;
    for _ in 0..2 {
        assert!(matches!(rig.runner.run_once(), PassOutcome::Published(_)));
    }
    let latest = rig.state.latest_frame().expect("frame published");
    let decoded = image::load_from_memory(latest.bytes())?.to_rgb8();
    assert_eq!(decoded.dimensions(), (80, 80));
    assert!(decoded.pixels().any(|p| *p == FPS_COLOR));
    // Only the overlay is drawn: everything else is still black.
    assert!(decoded
        .pixels()
        .all(|p| *p == FPS_COLOR || *p == Rgb([0, 0, 0])));
    Ok(())
}

#[test]
fn fixed_detection_is_drawn_only_while_enabled() -> Result<()> {
    let mut rig = rig(black_source(), fixed_engine())?;

    rig.runner.run_once();
    let off = rig.state.latest_frame().expect("frame published");
    let decoded = image::load_from_memory(off.bytes())?.to_rgb8();
    assert_eq!(*decoded.get_pixel(10, 15), Rgb([0, 0, 0]));
    assert!(off.detections.is_empty());

    rig.control.set_detection_enabled(true);
    rig.runner.run_once();
    let on = rig.state.latest_frame().expect("frame published");
    let decoded = image::load_from_memory(on.bytes())?.to_rgb8();
    assert_eq!(*decoded.get_pixel(10, 15), DEFAULT_BOX_COLOR);
    assert_eq!(*decoded.get_pixel(30, 15), DEFAULT_BOX_COLOR);
    assert_eq!(on.detections.len(), 1);
    assert_eq!(on.detections[0].label, "test");
    Ok(())
}

#[test]
fn snapshot_before_and_after_first_frame() -> Result<()> {
    let mut rig = rig(black_source(), DetectorEngine::disabled())?;
    assert!(matches!(
        rig.control.capture_snapshot(),
        Err(SnapshotError::NoFrameAvailable)
    ));

    rig.runner.run_once();
    let path = rig.control.capture_snapshot()?;
    let latest = rig.state.latest_frame().expect("frame published");
    assert_eq!(std::fs::read(&path)?, latest.bytes());
    assert!(path.ends_with("image1.png"));
    Ok(())
}

#[test]
fn unavailable_frames_skip_without_publishing() -> Result<()> {
    let mut rig = rig(black_source().fail_every(2), DetectorEngine::disabled())?;
    let outcomes: Vec<bool> = (0..4)
        .map(|_| matches!(rig.runner.run_once(), PassOutcome::Published(_)))
        .collect();
    assert_eq!(outcomes, vec![true, false, true, false]);
    assert_eq!(rig.state.frame_counter(), 2);
    assert_eq!(rig.state.latest_frame().map(|f| f.sequence), Some(2));
    Ok(())
}

#[test]
fn dropped_subscriber_does_not_disturb_others() -> Result<()> {
    let mut rig = rig(black_source(), DetectorEngine::disabled())?;
    let steady = rig.hub.subscribe();
    let leaving = rig.hub.subscribe();

    rig.runner.run_once();
    drop(leaving);
    rig.runner.run_once();
    rig.runner.run_once();

    assert_eq!(rig.hub.subscriber_count(), 1);
    let mut sequences = Vec::new();
    while let Ok(Some(frame)) = steady.recv_timeout(Duration::from_millis(50)) {
        sequences.push(frame.sequence);
    }
    assert_eq!(sequences, vec![1, 2, 3]);
    Ok(())
}

#[test]
fn concurrent_toggling_never_tears_the_flag() -> Result<()> {
    let rig = rig(black_source(), fixed_engine())?;
    let Rig {
        runner,
        state,
        control,
        hub: _hub,
        _dir,
    } = rig;
    let handle = runner.spawn()?;

    let stop = Arc::new(AtomicBool::new(false));
    let togglers: Vec<_> = (0..4)
        .map(|i| {
            let control = control.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut value = i % 2 == 0;
                while !stop.load(Ordering::SeqCst) {
                    control.set_detection_enabled(value);
                    value = !value;
                }
            })
        })
        .collect();

    let deadline = Instant::now() + Duration::from_secs(10);
    while state.frame_counter() < 10 && Instant::now() < deadline {
        let _ = state.detection_enabled();
        thread::sleep(Duration::from_millis(5));
    }
    stop.store(true, Ordering::SeqCst);
    for toggler in togglers {
        toggler.join().expect("toggler thread");
    }
    handle.stop()?;

    assert!(state.frame_counter() >= 10);
    // Every frame is either fully annotated or not annotated at all.
    let latest = state.latest_frame().expect("frame published");
    let decoded = image::load_from_memory(latest.bytes())?.to_rgb8();
    let boxed = *decoded.get_pixel(10, 15) == DEFAULT_BOX_COLOR;
    assert_eq!(boxed, !latest.detections.is_empty());
    assert_eq!(boxed, *decoded.get_pixel(30, 15) == DEFAULT_BOX_COLOR);

    control.set_detection_enabled(false);
    assert!(!state.detection_enabled());
    Ok(())
}
