use subscrub::{
    inpaint::Algorithm,
    region::RegionSet,
    task::{Task, TaskId, TaskState},
    RemovalError,
};

fn new_task(auto_detect: bool) -> Task {
    Task::new(
        TaskId::generate(),
        Algorithm::Sttn,
        RegionSet::empty(),
        auto_detect,
    )
}

#[test]
fn explicit_region_lifecycle_skips_detecting() {
    let mut task = new_task(false);
    assert_eq!(task.state(), TaskState::Pending);

    task.begin_processing(10).expect("pending -> processing");
    assert_eq!(task.state(), TaskState::Processing);

    task.record_progress(4);
    assert!((task.progress_percent() - 40.0).abs() < f32::EPSILON);

    task.complete("memory://frames/10".to_string())
        .expect("processing -> completed");
    assert_eq!(task.state(), TaskState::Completed);
    assert!((task.progress_percent() - 100.0).abs() < f32::EPSILON);

    let view = task.view();
    assert_eq!(view.output_ref.as_deref(), Some("memory://frames/10"));
    assert!(view.error.is_none());
    assert!(view.finished_at_epoch_secs.is_some());
}

#[test]
fn auto_detect_lifecycle_passes_through_detecting() {
    let mut task = new_task(true);
    task.begin_detecting().expect("pending -> detecting");
    assert_eq!(task.state(), TaskState::Detecting);

    let resolved = RegionSet::from_corner_list(&[[108, 96, 972, 249]]).expect("regions");
    task.resolve_regions(resolved.clone()).expect("resolve");
    assert_eq!(task.regions, resolved);

    task.begin_processing(3).expect("detecting -> processing");
    assert_eq!(task.state(), TaskState::Processing);
}

#[test]
fn completed_cannot_be_reached_from_pending() {
    let mut task = new_task(false);
    let err = task
        .complete("out".to_string())
        .expect_err("pending -> completed must be illegal");
    assert_eq!(err.kind(), "fatal");
    assert_eq!(task.state(), TaskState::Pending);
}

#[test]
fn terminal_states_are_frozen() {
    let mut task = new_task(false);
    task.begin_processing(1).expect("processing");
    task.complete("out".to_string()).expect("completed");

    assert!(task.cancel().is_err());
    assert!(task
        .fail(&RemovalError::Fatal {
            stage: "test",
            detail: "late failure".to_string(),
        })
        .is_err());
    assert!(task.begin_processing(1).is_err());
    assert_eq!(task.state(), TaskState::Completed);
}

#[test]
fn failure_records_immutable_error_detail() {
    let mut task = new_task(false);
    task.begin_processing(5).expect("processing");
    task.fail(&RemovalError::Transient {
        stage: "detect",
        detail: "timed out".to_string(),
    })
    .expect("processing -> failed");

    let view = task.view();
    let error = view.error.expect("error detail recorded");
    assert_eq!(error.kind, "transient");
    assert!(error.detail.contains("timed out"));
    assert_eq!(task.state(), TaskState::Failed);
}

#[test]
fn cancel_allowed_from_any_non_terminal_state() {
    for setup in 0..3 {
        let mut task = new_task(true);
        match setup {
            1 => task.begin_detecting().expect("detecting"),
            2 => {
                task.begin_detecting().expect("detecting");
                task.begin_processing(4).expect("processing");
            }
            _ => {}
        }
        task.cancel().expect("cancel from non-terminal");
        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(task.view().error.is_none());
    }
}

#[test]
fn progress_is_monotonic_and_stops_at_terminal() {
    let mut task = new_task(false);
    task.begin_processing(10).expect("processing");
    task.record_progress(6);
    task.record_progress(3);
    assert!((task.progress_percent() - 60.0).abs() < f32::EPSILON);

    task.cancel().expect("cancelled");
    task.record_progress(9);
    assert!((task.progress_percent() - 60.0).abs() < f32::EPSILON);
}

#[test]
fn transition_table_rejects_backward_edges() {
    assert!(TaskState::Pending.can_transition_to(TaskState::Detecting));
    assert!(TaskState::Pending.can_transition_to(TaskState::Processing));
    assert!(TaskState::Detecting.can_transition_to(TaskState::Processing));
    assert!(TaskState::Processing.can_transition_to(TaskState::Completed));

    assert!(!TaskState::Detecting.can_transition_to(TaskState::Pending));
    assert!(!TaskState::Processing.can_transition_to(TaskState::Detecting));
    assert!(!TaskState::Pending.can_transition_to(TaskState::Completed));
    assert!(!TaskState::Completed.can_transition_to(TaskState::Failed));
    assert!(!TaskState::Cancelled.can_transition_to(TaskState::Processing));
    assert!(!TaskState::Failed.can_transition_to(TaskState::Completed));
}

/// Applies randomized event sequences and checks no walk ever moves a task
/// backwards or out of a terminal state; whichever terminal state is reached
/// first is final.
#[test]
fn randomized_event_walks_never_leave_terminal_or_move_backwards() {
    let rank = |state: TaskState| match state {
        TaskState::Pending => 0,
        TaskState::Detecting => 1,
        TaskState::Processing => 2,
        TaskState::Completed | TaskState::Failed | TaskState::Cancelled => 3,
    };

    for seed in 0..200u64 {
        let mut task = new_task(seed % 2 == 0);
        let mut value = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let mut previous = task.state();

        for _ in 0..32 {
            value = value
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            match value >> 60 {
                0 | 1 => {
                    let _ = task.begin_detecting();
                }
                2 | 3 | 4 => {
                    let _ = task.begin_processing(8);
                }
                5 | 6 | 7 | 8 => {
                    let _ = task.complete("out".to_string());
                }
                9 | 10 => {
                    let _ = task.fail(&RemovalError::Fatal {
                        stage: "test",
                        detail: "induced".to_string(),
                    });
                }
                11 | 12 => {
                    let _ = task.cancel();
                }
                _ => task.record_progress((value >> 32) as u64 % 9),
            }

            let current = task.state();
            if previous.is_terminal() {
                // No event may move a terminal task.
                assert_eq!(current, previous, "seed {seed}: terminal state mutated");
                continue;
            }
            assert!(
                rank(current) >= rank(previous),
                "seed {seed}: state moved backwards {previous} -> {current}"
            );
            previous = current;
        }
    }
}
