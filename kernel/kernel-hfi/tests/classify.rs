#![cfg(feature = "ipc-classes")]

mod common;

use common::{hfi_status, hw_publish, rig};
use kernel_hfi::regs::ThreadFeedbackChar;
use kernel_hfi::{CpuModel, IPC_CLASS_UNCLASSIFIED, ScoreError, TaskClass};

fn feedback(classid: u8, valid: bool) -> u64 {
    ThreadFeedbackChar::new()
        .with_classid(classid)
        .with_valid(valid)
        .into_bits()
}

#[test]
fn stable_observations_commit_a_class() {
    let r = rig(1, true, 4);
    r.hfi.online(0);

    let mut task = TaskClass::new();
    r.hw.set_msr(0, ThreadFeedbackChar::MSR, feedback(2, true));
    for _ in 0..3 {
        r.hfi.update_ipcc(&mut task, 0);
        assert_eq!(task.ipcc(), IPC_CLASS_UNCLASSIFIED);
    }
    r.hfi.update_ipcc(&mut task, 0);
    // Hardware class 2 commits as scheduler class 3.
    assert_eq!(task.ipcc(), 3);
}

#[test]
fn a_flapping_class_never_commits() {
    let r = rig(1, true, 4);
    r.hfi.online(0);

    let mut task = TaskClass::new();
    for classid in [2, 2, 1, 2] {
        r.hw.set_msr(0, ThreadFeedbackChar::MSR, feedback(classid, true));
        r.hfi.update_ipcc(&mut task, 0);
    }
    assert_eq!(task.ipcc(), IPC_CLASS_UNCLASSIFIED);
}

#[test]
fn invalid_feedback_is_skipped_without_resetting() {
    let r = rig(1, true, 4);
    r.hfi.online(0);

    let mut task = TaskClass::new();
    r.hw.set_msr(0, ThreadFeedbackChar::MSR, feedback(2, true));
    for _ in 0..3 {
        r.hfi.update_ipcc(&mut task, 0);
    }

    // An invalid read is no observation at all: it neither commits nor
    // restarts the streak.
    r.hw.set_msr(0, ThreadFeedbackChar::MSR, feedback(7, false));
    r.hfi.update_ipcc(&mut task, 0);
    assert_eq!(task.ipcc(), IPC_CLASS_UNCLASSIFIED);

    r.hw.set_msr(0, ThreadFeedbackChar::MSR, feedback(2, true));
    r.hfi.update_ipcc(&mut task, 0);
    assert_eq!(task.ipcc(), 3);
}

#[test]
fn hybrid_models_distrust_low_classes_under_smt_load() {
    let r = rig(2, true, 4);
    r.hfi.online(0);
    r.hfi.online(1);
    r.topo.set_model(CpuModel::AlderLake);
    r.topo.set_idle(0, false);

    // Class 0 with a busy sibling: inaccurate, never counted.
    let mut task = TaskClass::new();
    r.hw.set_msr(0, ThreadFeedbackChar::MSR, feedback(0, true));
    for _ in 0..8 {
        r.hfi.update_ipcc(&mut task, 0);
    }
    assert_eq!(task.ipcc(), IPC_CLASS_UNCLASSIFIED);

    // Same observations with idle siblings are trusted.
    r.topo.set_idle(0, true);
    for _ in 0..4 {
        r.hfi.update_ipcc(&mut task, 0);
    }
    assert_eq!(task.ipcc(), 1);

    // Classes 2 and 3 are trusted even under SMT load.
    let mut task = TaskClass::new();
    r.topo.set_idle(1, false);
    r.hw.set_msr(1, ThreadFeedbackChar::MSR, feedback(3, true));
    for _ in 0..4 {
        r.hfi.update_ipcc(&mut task, 1);
    }
    assert_eq!(task.ipcc(), 4);
}

#[test]
fn worker_publishes_per_class_scores() {
    let r = rig(2, true, 3);
    r.hfi.online(0);
    r.hfi.online(1);

    let base = r.hw.table_base();
    hw_publish(
        base,
        3,
        &[
            (0, &[(10, 1), (20, 2), (30, 3)]),
            (1, &[(40, 4), (50, 5), (60, 6)]),
        ],
        1,
    );
    r.hfi.process_event(0, hfi_status());
    r.hfi.process_pending(0);

    // Scores are per CPU, per class, 1-based from the scheduler's side.
    assert_eq!(r.hfi.get_ipcc_score(1, 0), Ok(10));
    assert_eq!(r.hfi.get_ipcc_score(2, 0), Ok(20));
    assert_eq!(r.hfi.get_ipcc_score(3, 0), Ok(30));
    assert_eq!(r.hfi.get_ipcc_score(1, 1), Ok(40));
    assert_eq!(r.hfi.get_ipcc_score(3, 1), Ok(60));

    // An unclassified task scores as class 1.
    assert_eq!(
        r.hfi.get_ipcc_score(IPC_CLASS_UNCLASSIFIED, 1),
        r.hfi.get_ipcc_score(1, 1)
    );
}

#[test]
fn score_queries_validate_their_inputs() {
    let r = rig(2, true, 3);
    r.hfi.online(0);

    assert_eq!(r.hfi.get_ipcc_score(1, 2), Err(ScoreError::InvalidCpu));
    assert_eq!(r.hfi.get_ipcc_score(4, 0), Err(ScoreError::InvalidClass));
    // Before any update every valid query reports zero.
    assert_eq!(r.hfi.get_ipcc_score(1, 0), Ok(0));
}

#[test]
fn scores_are_unavailable_without_thread_director() {
    let r = rig(1, false, 0);
    r.hfi.online(0);
    assert_eq!(r.hfi.get_ipcc_score(1, 0), Err(ScoreError::Unavailable));

    // Classification requests are dropped (with a one-time warning).
    let mut task = TaskClass::new();
    r.hw.set_msr(0, ThreadFeedbackChar::MSR, feedback(2, true));
    for _ in 0..8 {
        r.hfi.update_ipcc(&mut task, 0);
    }
    assert_eq!(task.ipcc(), IPC_CLASS_UNCLASSIFIED);
}
