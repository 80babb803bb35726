mod common;

use common::{Spaces, entry, scheduler, scheduler_with};
use kernel_sched::{
    OpenFile, Registers, Ring, SchedError, SchedulerConfig, SimulatedSwitch, TaskState,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Counted(Arc<AtomicUsize>);

impl OpenFile for Counted {
    fn close(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn duplicate(&self) -> Box<dyn OpenFile> {
        Box::new(Self(Arc::clone(&self.0)))
    }
}

#[test]
fn tasks_run_in_creation_order_and_rotate() {
    let mut spaces = Spaces::new();
    let mut sched = scheduler(&mut spaces);
    let kernel = sched.kernel_space();
    let boot = sched.current();
    let a = sched.create_task(entry(1), kernel, Ring::Kernel, vec![]).unwrap();
    let b = sched.create_task(entry(2), kernel, Ring::Kernel, vec![]).unwrap();
    let c = sched.create_task(entry(3), kernel, Ring::Kernel, vec![]).unwrap();

    let mut order = Vec::new();
    for _ in 0..5 {
        sched.yield_now();
        order.push(sched.current());
    }
    assert_eq!(order, vec![a, b, c, boot, a]);
    assert_eq!(sched.switch().switches(), 5);
    assert_eq!(sched.ready_tasks().collect::<Vec<_>>(), vec![b, c, boot]);
}

#[test]
fn yield_without_other_tasks_keeps_running() {
    let mut spaces = Spaces::new();
    let mut sched = scheduler(&mut spaces);
    let boot = sched.current();
    sched.yield_now();
    assert_eq!(sched.current(), boot);
    assert_eq!(sched.state(boot), Some(TaskState::Running));
    assert_eq!(sched.switch().switches(), 0);
}

#[test]
fn exhausted_quantum_preempts_and_resets() {
    let mut spaces = Spaces::new();
    let config = SchedulerConfig {
        quantum: 3,
        ..SchedulerConfig::default()
    };
    let mut sched = scheduler_with(&mut spaces, config);
    let kernel = sched.kernel_space();
    let boot = sched.current();
    let a = sched.create_task(entry(1), kernel, Ring::Kernel, vec![]).unwrap();

    sched.tick();
    sched.tick();
    assert_eq!(sched.current(), boot);
    assert_eq!(sched.task(boot).unwrap().ticks_remaining(), 1);

    sched.tick();
    assert_eq!(sched.current(), a);
    assert_eq!(sched.state(boot), Some(TaskState::Ready));
    assert_eq!(sched.task(boot).unwrap().ticks_remaining(), 3);
}

#[test]
fn scheduler_lock_postpones_preemption_until_released() {
    let mut spaces = Spaces::new();
    let config = SchedulerConfig {
        quantum: 2,
        ..SchedulerConfig::default()
    };
    let mut sched = scheduler_with(&mut spaces, config);
    let kernel = sched.kernel_space();
    let boot = sched.current();
    let a = sched.create_task(entry(1), kernel, Ring::Kernel, vec![]).unwrap();

    {
        let mut outer = sched.lock_scheduler();
        {
            let mut inner = outer.lock_scheduler();
            inner.tick();
            inner.tick();
            inner.tick();
            assert_eq!(inner.current(), boot);
        }
        assert!(outer.is_scheduler_locked());
        assert_eq!(outer.current(), boot);
    }
    assert!(!sched.is_scheduler_locked());
    assert_eq!(sched.current(), a);
}

#[test]
fn voluntary_yield_still_switches_under_scheduler_lock() {
    let mut spaces = Spaces::new();
    let mut sched = scheduler(&mut spaces);
    let kernel = sched.kernel_space();
    let a = sched.create_task(entry(1), kernel, Ring::Kernel, vec![]).unwrap();

    let mut guard = sched.lock_scheduler();
    guard.yield_now();
    assert_eq!(guard.current(), a);
}

#[test]
fn task_switch_lock_defers_yield() {
    let mut spaces = Spaces::new();
    let mut sched = scheduler(&mut spaces);
    let kernel = sched.kernel_space();
    let boot = sched.current();
    let a = sched.create_task(entry(1), kernel, Ring::Kernel, vec![]).unwrap();

    {
        let mut guard = sched.lock_task_switches();
        assert!(guard.is_scheduler_locked());
        guard.yield_now();
        assert_eq!(guard.current(), boot);
        assert_eq!(guard.switch().switches(), 0);
    }
    assert!(!sched.are_task_switches_locked());
    assert_eq!(sched.current(), a);
}

#[test]
fn blocked_task_leaves_queue_until_unblocked() {
    let mut spaces = Spaces::new();
    let mut sched = scheduler(&mut spaces);
    let kernel = sched.kernel_space();
    let boot = sched.current();
    let a = sched.create_task(entry(1), kernel, Ring::Kernel, vec![]).unwrap();

    sched.block_current().unwrap();
    assert_eq!(sched.current(), a);
    assert_eq!(sched.state(boot), Some(TaskState::Blocked));
    assert_eq!(sched.ready_tasks().count(), 0);

    sched.unblock(boot).unwrap();
    assert_eq!(sched.ready_tasks().collect::<Vec<_>>(), vec![boot]);
    assert_eq!(sched.unblock(a), Err(SchedError::NotBlocked(a)));
}

#[test]
fn idle_runs_when_nothing_is_ready_and_yields_to_new_work() {
    let mut spaces = Spaces::new();
    let mut sched = scheduler(&mut spaces);
    let boot = sched.current();
    let idle = sched.idle_task();

    sched.block_current().unwrap();
    assert_eq!(sched.current(), idle);

    sched.tick();
    assert_eq!(sched.current(), idle);

    sched.unblock(boot).unwrap();
    sched.tick();
    assert_eq!(sched.current(), boot);
    assert_eq!(sched.ready_tasks().count(), 0);
    assert_eq!(sched.state(idle), Some(TaskState::Ready));
}

#[test]
fn new_tasks_start_at_the_trampoline_in_their_own_space() {
    let mut spaces = Spaces::new();
    let mut sched = scheduler(&mut spaces);
    let user_space = spaces.next();
    let t = sched.create_task(entry(7), user_space, Ring::User, vec!["init".into()]).unwrap();

    let task = sched.task(t).unwrap();
    let regs = task.registers();
    assert_eq!(regs.rip, SimulatedSwitch::TRAMPOLINE);
    assert_eq!(regs.rbx, entry(7).as_u64());
    assert_eq!(regs.r12, 3);
    assert_eq!(regs.root(), user_space.root);
    assert_eq!(task.args(), ["init".to_string()]);
    assert_eq!(task.parent(), Some(sched.boot_task()));

    sched.yield_now();
    assert_eq!(sched.switch().last_target().unwrap().root(), user_space.root);
}

#[test]
fn only_user_tasks_get_process_ids() {
    let mut spaces = Spaces::new();
    let mut sched = scheduler(&mut spaces);
    let kernel = sched.kernel_space();
    let k = sched.create_task(entry(1), kernel, Ring::Kernel, vec![]).unwrap();
    let u1 = sched.create_task(entry(2), spaces.next(), Ring::User, vec![]).unwrap();
    let u2 = sched.create_task(entry(3), spaces.next(), Ring::User, vec![]).unwrap();

    assert_eq!(sched.task(k).unwrap().pid(), None);
    let p1 = sched.task(u1).unwrap().pid().unwrap();
    let p2 = sched.task(u2).unwrap().pid().unwrap();
    assert_ne!(p1, p2);
}

#[test]
fn copied_task_returns_zero_and_inherits_files_and_directory() {
    let mut spaces = Spaces::new();
    let mut sched = scheduler(&mut spaces);
    let parent = sched.create_task(entry(1), spaces.next(), Ring::User, vec!["sh".into()]).unwrap();
    sched.yield_now();
    assert_eq!(sched.current(), parent);

    let closed = Arc::new(AtomicUsize::new(0));
    sched.open_file(Box::new(Counted(Arc::clone(&closed)))).unwrap();
    sched.set_cwd("/home".into()).unwrap();

    let frame = Registers {
        rax: 42,
        rip: 0x0040_1000,
        rsp: 0x7FFF_FFFE_F000,
        ..Registers::default()
    };
    let child_space = spaces.next();
    let child = sched.copy_task(child_space, &frame).unwrap();

    let task = sched.task(child).unwrap();
    assert_eq!(task.registers().rax, 0);
    assert_eq!(task.registers().rip, 0x0040_1000);
    assert_eq!(task.registers().root(), child_space.root);
    assert_eq!(task.files().open_count(), 1);
    assert_eq!(task.cwd(), "/home");
    assert_eq!(task.args(), ["sh".to_string()]);
    assert_eq!(task.parent(), Some(parent));
    assert_eq!(task.state(), TaskState::Ready);
    assert_ne!(task.pid(), sched.task(parent).unwrap().pid());
    assert_eq!(sched.ready_tasks().last(), Some(child));
}

#[test]
fn terminated_task_is_reclaimed_by_the_reclaimer() {
    let mut spaces = Spaces::new();
    let mut sched = scheduler(&mut spaces);
    let boot = sched.current();
    let reclaimer = sched.reclaimer_task();
    let space = spaces.next();
    let a = sched.create_task(entry(1), space, Ring::User, vec![]).unwrap();
    sched.yield_now();

    let closed = Arc::new(AtomicUsize::new(0));
    sched.open_file(Box::new(Counted(Arc::clone(&closed)))).unwrap();
    sched.terminate_current().unwrap();

    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert_eq!(sched.state(a), Some(TaskState::Terminated));
    assert_eq!(sched.current(), boot);
    assert_eq!(sched.pending_reclaim(), 1);
    assert_eq!(sched.ready_tasks().collect::<Vec<_>>(), vec![reclaimer]);

    sched.yield_now();
    assert_eq!(sched.current(), reclaimer);
    let reclaimed = sched.take_reclaimable().unwrap();
    assert_eq!(reclaimed.id, a);
    assert_eq!(reclaimed.space, space);
    assert!(sched.take_reclaimable().is_none());
    assert_eq!(sched.state(a), None);

    sched.park_reclaimer();
    assert_eq!(sched.state(reclaimer), Some(TaskState::Blocked));
    assert_eq!(sched.current(), boot);
}

#[test]
fn idle_and_reclaimer_cannot_terminate() {
    let mut spaces = Spaces::new();
    let mut sched = scheduler(&mut spaces);
    let idle = sched.idle_task();
    sched.block_current().unwrap();
    assert_eq!(sched.current(), idle);
    assert_eq!(sched.terminate_current(), Err(SchedError::CannotTerminate(idle)));
}

#[test]
fn full_reclaim_queue_refuses_termination() {
    let mut spaces = Spaces::new();
    let config = SchedulerConfig {
        reclaim_capacity: 1,
        ..SchedulerConfig::default()
    };
    let mut sched = scheduler_with(&mut spaces, config);
    let kernel = sched.kernel_space();
    let _a = sched.create_task(entry(1), kernel, Ring::Kernel, vec![]).unwrap();
    let b = sched.create_task(entry(2), kernel, Ring::Kernel, vec![]).unwrap();

    sched.yield_now();
    sched.terminate_current().unwrap();
    assert_eq!(sched.current(), b);
    assert_eq!(sched.terminate_current(), Err(SchedError::ReclaimQueueFull));
    assert_eq!(sched.state(b), Some(TaskState::Running));
}

#[test]
fn waiting_for_a_task_blocks_until_it_terminates() {
    let mut spaces = Spaces::new();
    let mut sched = scheduler(&mut spaces);
    let kernel = sched.kernel_space();
    let boot = sched.current();
    let a = sched.create_task(entry(1), kernel, Ring::Kernel, vec![]).unwrap();

    assert_eq!(sched.wait_for(boot), Err(SchedError::WaitForSelf));
    sched.wait_for(a).unwrap();
    assert_eq!(sched.current(), a);
    assert_eq!(sched.state(boot), Some(TaskState::Blocked));

    sched.terminate_current().unwrap();
    assert_eq!(sched.current(), boot);
    assert_eq!(sched.wait_for(a), Ok(()));

    sched.yield_now();
    assert!(sched.take_reclaimable().is_some());
    assert_eq!(sched.wait_for(a), Err(SchedError::NoSuchTask(a)));
}

#[test]
fn closing_an_unknown_descriptor_fails() {
    let mut spaces = Spaces::new();
    let mut sched = scheduler(&mut spaces);
    let closed = Arc::new(AtomicUsize::new(0));
    let fd = sched.open_file(Box::new(Counted(Arc::clone(&closed)))).unwrap();
    assert!(sched.file(fd).is_some());
    sched.close_file(fd).unwrap();
    assert!(sched.file(fd).is_none());
    assert_eq!(sched.close_file(fd), Err(SchedError::BadDescriptor(fd)));
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}
