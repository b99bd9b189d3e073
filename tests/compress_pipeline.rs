mod support;

use std::sync::Arc;

use clipdrop_core::{ClipRequest, CompressSettings, CompressionResult, Resolution, ResolutionTier};
use support::{
    ClipEnv, FixedProbe, MB, RecordingSink, ScriptedTranscoder, Step, compressor,
    compressor_with, file_tag, progress_recorder,
};

const FULL_HD: Option<Resolution> = Some(Resolution::new(1920, 1080));

#[test]
fn first_tier_within_budget_is_kept() {
    let env = ClipEnv::new(100 * MB);
    let transcoder = ScriptedTranscoder::new(|inv| {
        if inv.is_tier("1920x1080") {
            Step::Write(12 * MB)
        } else {
            Step::Write(6 * MB)
        }
    });
    let (progress, seen) = progress_recorder();
    let c = compressor(
        "libx264",
        transcoder.clone(),
        FixedProbe::new(FULL_HD),
        Arc::new(RecordingSink::default()),
    );
    let request = ClipRequest::new(&env.source, 10.0, 40.0, &env.output, 8 * MB).with_progress(progress);

    let result = c.compress(&request);

    assert!(result.success, "{}", result.message);
    assert_eq!(result.message, "Video processed successfully");
    assert_eq!(result.tier.as_deref(), Some("720p"));
    assert_eq!(result.file_size, 6 * MB);
    assert!(result.within_limit);
    assert!(!result.recompressed);
    assert_eq!(result.file_path.as_deref(), Some(env.output.as_path()));
    assert_eq!(env.leftovers(), vec!["clip.mp4"]);

    // Two tiers, two passes each; 480p and below never ran.
    let calls = transcoder.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[0].scale(), Some("1920x1080"));
    assert_eq!(calls[2].scale(), Some("1280x720"));
    assert!(calls.iter().all(|c| !c.is_recovery()));

    let seen = seen.lock();
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "not monotonic: {:?}", *seen);
    assert_eq!(seen.last(), Some(&100));
}

#[test]
fn smaller_source_skips_upscaling_tiers() {
    let env = ClipEnv::new(100 * MB);
    let transcoder = ScriptedTranscoder::new(|_| Step::Write(MB));
    let c = compressor(
        "libx264",
        transcoder.clone(),
        FixedProbe::new(Some(Resolution::new(854, 480))),
        Arc::new(RecordingSink::default()),
    );
    let result = c.compress(&ClipRequest::new(&env.source, 0.0, 5.0, &env.output, 8 * MB));

    // The source size itself is the first tier; 480p duplicates it.
    assert_eq!(result.tier.as_deref(), Some("original"));
    let calls = transcoder.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.scale() == Some("854x480")));
    assert_eq!(file_tag(&env.output), "854x480|libx264");
}

#[test]
fn oversized_best_attempt_is_recompressed() {
    let env = ClipEnv::new(100 * MB);
    let transcoder = ScriptedTranscoder::new(|inv| {
        if inv.is_recovery() {
            Step::Write(7 * MB)
        } else if inv.is_tier("640x360") {
            Step::Write(9 * MB)
        } else {
            Step::Write(10 * MB)
        }
    });
    let probe = FixedProbe::new(FULL_HD);
    let c = compressor(
        "libx264",
        transcoder.clone(),
        probe.clone(),
        Arc::new(RecordingSink::default()),
    );
    let result = c.compress(&ClipRequest::new(&env.source, 0.0, 60.0, &env.output, 8 * MB));

    assert!(result.success);
    assert!(result.within_limit);
    assert!(result.recompressed);
    assert_eq!(result.tier.as_deref(), Some("360p"));
    assert_eq!(result.file_size, 7 * MB);
    assert_eq!(env.leftovers(), vec!["clip.mp4"]);

    let recovery: Vec<_> = transcoder.calls().into_iter().filter(|c| c.is_recovery()).collect();
    assert_eq!(recovery.len(), 1, "recovery is a single pass");
    assert_eq!(recovery[0].pass, None);
    assert!(
        probe
            .probed()
            .iter()
            .any(|p| p.to_string_lossy().ends_with(".temp_oversized_original.mp4"))
    );
}

#[test]
fn failed_recovery_restores_best_attempt() {
    let env = ClipEnv::new(100 * MB);
    let transcoder = ScriptedTranscoder::new(|inv| {
        if inv.is_recovery() {
            Step::Write(8 * MB + 1)
        } else if inv.is_tier("854x480") {
            Step::Write(9 * MB)
        } else {
            Step::Write(11 * MB)
        }
    });
    let c = compressor(
        "libx264",
        transcoder,
        FixedProbe::new(None),
        Arc::new(RecordingSink::default()),
    );
    let result = c.compress(&ClipRequest::new(&env.source, 0.0, 60.0, &env.output, 8 * MB));

    assert!(result.success);
    assert!(!result.within_limit);
    assert!(!result.recompressed);
    assert_eq!(result.tier.as_deref(), Some("480p"));
    assert_eq!(result.file_size, 9 * MB);
    assert!(result.message.contains("larger than the limit"), "{}", result.message);
    assert_eq!(std::fs::metadata(&env.output).unwrap().len(), 9 * MB);
    assert_eq!(file_tag(&env.output), "854x480|libx264");
    assert_eq!(env.leftovers(), vec!["clip.mp4"]);
}

/// Tiers: 1920x1080 and 360p oversized, 360p smallest; recovery misbehaves in `recovery`.
fn recovery_scenario(recovery: Step) -> (ClipEnv, CompressionResult) {
    let env = ClipEnv::new(100 * MB);
    let transcoder = ScriptedTranscoder::new(move |inv| {
        if inv.is_recovery() {
            recovery
        } else if inv.is_tier("640x360") {
            Step::Write(9 * MB)
        } else {
            Step::Write(11 * MB)
        }
    });
    let c = compressor(
        "libx264",
        transcoder,
        FixedProbe::new(FULL_HD),
        Arc::new(RecordingSink::default()),
    );
    let result = c.compress(&ClipRequest::new(&env.source, 0.0, 60.0, &env.output, 8 * MB));
    (env, result)
}

#[test]
fn recovery_encoder_failure_restores_best_attempt() {
    let (env, result) = recovery_scenario(Step::Fail(1));

    assert!(result.success, "{}", result.message);
    assert!(!result.within_limit);
    assert!(!result.recompressed);
    assert_eq!(result.file_size, 9 * MB);
    assert_eq!(std::fs::metadata(&env.output).unwrap().len(), 9 * MB);
    assert_eq!(file_tag(&env.output), "640x360|libx264");
    assert_eq!(env.leftovers(), vec!["clip.mp4"]);
}

#[test]
fn empty_recovery_output_restores_best_attempt() {
    let (env, result) = recovery_scenario(Step::Write(0));

    assert!(result.success, "{}", result.message);
    assert!(!result.within_limit);
    assert!(!result.recompressed);
    assert_eq!(result.file_size, 9 * MB);
    assert_eq!(file_tag(&env.output), "640x360|libx264");
    assert_eq!(env.leftovers(), vec!["clip.mp4"]);
}

#[test]
fn recovery_and_upload_fill_their_progress_ranges() {
    let env = ClipEnv::new(100 * MB);
    let transcoder = ScriptedTranscoder::new(|inv| {
        if inv.is_recovery() { Step::Write(MB) } else { Step::Write(20 * MB) }
    });
    let (progress, seen) = progress_recorder();
    let c = compressor(
        "libx264",
        transcoder,
        FixedProbe::new(FULL_HD),
        Arc::new(RecordingSink::default()),
    );
    let request = ClipRequest::new(&env.source, 0.0, 30.0, &env.output, 8 * MB)
        .with_destinations(vec!["https://hooks.test/ok".into()])
        .with_progress(progress);
    let result = c.compress(&request);

    assert!(result.recompressed);
    assert!(result.webhook_success);
    let seen = seen.lock();
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "not monotonic: {:?}", *seen);
    // Recovery at 50% lands mid 90-95, upload at 50% mid 95-100.
    assert_eq!(seen[seen.len() - 5..], [90, 93, 95, 98, 100], "{:?}", *seen);
}

#[test]
fn later_larger_tier_does_not_clobber_best_attempt() {
    let env = ClipEnv::new(100 * MB);
    let transcoder = ScriptedTranscoder::new(|inv| {
        if inv.is_recovery() {
            Step::Fail(1)
        } else if inv.is_tier("1920x1080") {
            Step::Write(9 * MB)
        } else {
            Step::Write(10 * MB)
        }
    });
    // Shares its label with the tier the planner makes for the source resolution.
    let settings = CompressSettings {
        resolution_ladder: vec![ResolutionTier::new(1280, 720, "original")],
        ..CompressSettings::default()
    };
    let c = compressor_with(
        settings,
        "libx264",
        transcoder.clone(),
        FixedProbe::new(FULL_HD),
        Arc::new(RecordingSink::default()),
    );
    let result = c.compress(&ClipRequest::new(&env.source, 0.0, 30.0, &env.output, 8 * MB));

    assert!(result.success, "{}", result.message);
    assert_eq!(result.file_size, 9 * MB);
    assert_eq!(file_tag(&env.output), "1920x1080|libx264");
    assert!(transcoder.calls().iter().any(|c| c.is_tier("1280x720")));
    assert_eq!(env.leftovers(), vec!["clip.mp4"]);
}

#[test]
fn duplicate_ladder_labels_are_rejected_before_encoding() {
    let env = ClipEnv::new(100 * MB);
    let transcoder = ScriptedTranscoder::new(|_| Step::Write(MB));
    let settings = CompressSettings {
        resolution_ladder: vec![
            ResolutionTier::new(1280, 720, "small"),
            ResolutionTier::new(640, 360, "small"),
        ],
        ..CompressSettings::default()
    };
    let c = compressor_with(
        settings,
        "libx264",
        transcoder.clone(),
        FixedProbe::new(FULL_HD),
        Arc::new(RecordingSink::default()),
    );
    let result = c.compress(&ClipRequest::new(&env.source, 0.0, 30.0, &env.output, 8 * MB));

    assert!(!result.success);
    assert!(result.message.contains("Invalid request"), "{}", result.message);
    assert!(result.message.contains("duplicate resolutionLadder label"), "{}", result.message);
    assert!(transcoder.calls().is_empty());
}

#[test]
fn recovery_uses_fallback_resolution_when_probe_fails() {
    let env = ClipEnv::new(100 * MB);
    let transcoder = ScriptedTranscoder::new(|inv| {
        if inv.is_recovery() { Step::Write(MB) } else { Step::Write(20 * MB) }
    });
    let c = compressor(
        "libx264",
        transcoder.clone(),
        FixedProbe::new(None),
        Arc::new(RecordingSink::default()),
    );
    let result = c.compress(&ClipRequest::new(&env.source, 0.0, 30.0, &env.output, 8 * MB));

    assert!(result.within_limit);
    let recovery = transcoder.calls().into_iter().find(|c| c.is_recovery()).unwrap();
    assert_eq!(recovery.scale(), Some("1280x720"));
}

#[test]
fn every_tier_failing_is_fatal() {
    let env = ClipEnv::new(100 * MB);
    let transcoder = ScriptedTranscoder::new(|_| Step::Fail(1));
    let (progress, seen) = progress_recorder();
    let c = compressor(
        "libx264",
        transcoder.clone(),
        FixedProbe::new(FULL_HD),
        Arc::new(RecordingSink::default()),
    );
    let request = ClipRequest::new(&env.source, 0.0, 30.0, &env.output, 8 * MB).with_progress(progress);
    let result = c.compress(&request);

    assert!(!result.success);
    assert_eq!(
        result.message,
        "Error processing video: Failed to generate a compressed video file after all attempts"
    );
    assert_eq!(result.file_path, None);
    assert_eq!(result.file_size, 0);
    assert!(!result.webhook_success);
    assert!(env.leftovers().is_empty(), "{:?}", env.leftovers());
    // Software failures are not retried: one first pass per tier.
    assert_eq!(transcoder.calls().len(), 4);
    assert_eq!(seen.lock().last(), Some(&0));
}

#[test]
fn hardware_failure_falls_back_to_software() {
    let env = ClipEnv::new(100 * MB);
    let transcoder = ScriptedTranscoder::new(|inv| {
        if inv.codec == "h264_nvenc" { Step::Fail(1) } else { Step::Write(3 * MB) }
    });
    let c = compressor(
        "h264_nvenc",
        transcoder.clone(),
        FixedProbe::new(FULL_HD),
        Arc::new(RecordingSink::default()),
    );
    let result = c.compress(&ClipRequest::new(&env.source, 0.0, 30.0, &env.output, 8 * MB));

    assert!(result.success);
    assert_eq!(result.tier.as_deref(), Some("original"));
    assert_eq!(transcoder.codecs(), vec!["h264_nvenc", "libx264", "libx264"]);
    let passes: Vec<_> = transcoder.calls().into_iter().map(|c| c.pass).collect();
    assert_eq!(passes, vec![Some("1".into()), Some("1".into()), Some("2".into())]);
}

#[test]
fn hardware_memory_exhaustion_falls_back_to_software() {
    let env = ClipEnv::new(100 * MB);
    let transcoder = ScriptedTranscoder::new(|inv| {
        if inv.codec == "hevc_nvenc" { Step::Oom } else { Step::Write(3 * MB) }
    });
    let c = compressor(
        "hevc_nvenc",
        transcoder.clone(),
        FixedProbe::new(FULL_HD),
        Arc::new(RecordingSink::default()),
    );
    let result = c.compress(&ClipRequest::new(&env.source, 0.0, 30.0, &env.output, 8 * MB));

    assert!(result.success, "{}", result.message);
    assert!(result.within_limit);
    assert_eq!(transcoder.codecs(), vec!["hevc_nvenc", "libx264", "libx264"]);
    assert_eq!(file_tag(&env.output), "1920x1080|libx264");
}

#[test]
fn cancellation_cleans_up_and_reports_cancelled() {
    let env = ClipEnv::new(100 * MB);
    let transcoder = ScriptedTranscoder::new(|inv| {
        if inv.is_tier("1280x720") { Step::Cancel } else { Step::Write(20 * MB) }
    });
    let (progress, seen) = progress_recorder();
    let c = compressor(
        "libx264",
        transcoder.clone(),
        FixedProbe::new(FULL_HD),
        Arc::new(RecordingSink::default()),
    );
    let request = ClipRequest::new(&env.source, 0.0, 30.0, &env.output, 8 * MB).with_progress(progress);
    let result = c.compress(&request);

    assert!(!result.success);
    assert_eq!(result.message, "Cancelled");
    assert!(env.leftovers().is_empty(), "{:?}", env.leftovers());
    assert!(transcoder.calls().iter().all(|c| c.scale() != Some("854x480")));
    assert_eq!(seen.lock().last(), Some(&0));
    assert!(c.cancel_token().is_cancelled());
}

#[test]
fn max_size_is_capped_by_source_size() {
    let env = ClipEnv::new(5 * MB);
    let transcoder = ScriptedTranscoder::new(|inv| {
        if inv.is_tier("1920x1080") { Step::Write(6 * MB) } else { Step::Write(4 * MB) }
    });
    let c = compressor(
        "libx264",
        transcoder,
        FixedProbe::new(FULL_HD),
        Arc::new(RecordingSink::default()),
    );
    let result = c.compress(&ClipRequest::new(&env.source, 0.0, 30.0, &env.output, 100 * MB));

    assert!(result.within_limit);
    assert_eq!(result.tier.as_deref(), Some("720p"));
}

#[test]
fn non_positive_duration_runs_nothing() {
    let env = ClipEnv::new(100 * MB);
    let transcoder = ScriptedTranscoder::new(|_| Step::Write(MB));
    let c = compressor(
        "libx264",
        transcoder.clone(),
        FixedProbe::new(FULL_HD),
        Arc::new(RecordingSink::default()),
    );
    let result = c.compress(&ClipRequest::new(&env.source, 12.0, 12.0, &env.output, 8 * MB));

    assert!(!result.success);
    assert!(result.message.starts_with("Error processing video:"), "{}", result.message);
    assert!(transcoder.calls().is_empty());
}

#[test]
fn uploads_report_per_destination() {
    let env = ClipEnv::new(100 * MB);
    let sink = Arc::new(RecordingSink::default());
    let c = compressor(
        "libx264",
        ScriptedTranscoder::new(|_| Step::Write(2 * MB)),
        FixedProbe::new(FULL_HD),
        sink.clone(),
    );
    let request = ClipRequest::new(&env.source, 0.0, 30.0, &env.output, 8 * MB)
        .with_destinations(vec!["https://hooks.test/ok".into(), "https://hooks.test/fail".into()])
        .with_title("Ace");
    let result = c.compress(&request);

    assert!(result.success);
    assert!(result.webhook_success);
    assert_eq!(result.destination_results, vec![true, false]);
    let sent = sink.sent.lock();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], ("https://hooks.test/ok".to_string(), Some("Ace".to_string()), 2 * MB));
}

#[test]
fn no_destinations_means_no_webhook_success() {
    let env = ClipEnv::new(100 * MB);
    let sink = Arc::new(RecordingSink::default());
    let c = compressor(
        "libx264",
        ScriptedTranscoder::new(|_| Step::Write(2 * MB)),
        FixedProbe::new(FULL_HD),
        sink.clone(),
    );
    let result = c.compress(&ClipRequest::new(&env.source, 0.0, 30.0, &env.output, 8 * MB));

    assert!(result.success);
    assert!(!result.webhook_success);
    assert!(result.destination_results.is_empty());
    assert!(sink.sent.lock().is_empty());
}

#[tokio::test]
async fn compress_async_runs_on_blocking_pool() {
    let env = ClipEnv::new(100 * MB);
    let c = Arc::new(compressor(
        "libx264",
        ScriptedTranscoder::new(|_| Step::Write(MB)),
        FixedProbe::new(FULL_HD),
        Arc::new(RecordingSink::default()),
    ));
    let request = ClipRequest::new(&env.source, 0.0, 30.0, &env.output, 8 * MB);
    let result = c.compress_async(request).await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.file_size, MB);
}
