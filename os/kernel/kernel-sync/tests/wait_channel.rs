use kernel_sync::{SpinMutex, SyncOnceCell, WaitChannel};
use std::sync::Arc;
use std::thread;

fn wait_for_sleepers(channel: &WaitChannel, n: usize) {
    while channel.sleepers() < n {
        thread::yield_now();
    }
}

#[test]
fn stale_ticket_returns_immediately() {
    let channel = WaitChannel::new();
    let ticket = channel.ticket();
    channel.wake_all();

    // the wakeup already happened; must not block
    channel.wait(ticket);
    assert_eq!(channel.sleepers(), 0);
}

#[test]
fn sleeper_rechecks_condition_after_wakeup() {
    let state = Arc::new(SpinMutex::new(0u32));
    let channel = Arc::new(WaitChannel::new());

    let sleeper = {
        let state = Arc::clone(&state);
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            let mut wakeups = 0;
            let mut guard = state.lock();
            while *guard < 2 {
                guard = channel.sleep(guard);
                wakeups += 1;
            }
            wakeups
        })
    };

    // first wakeup does not satisfy the condition; the sleeper goes back to sleep
    wait_for_sleepers(&channel, 1);
    state.with_lock(|v| *v = 1);
    channel.wake_all();

    wait_for_sleepers(&channel, 1);
    state.with_lock(|v| *v = 2);
    channel.wake_all();

    let wakeups = sleeper.join().unwrap();
    assert!(wakeups >= 1);
    assert_eq!(channel.sleepers(), 0);
}

#[test]
fn wake_all_releases_every_sleeper() {
    let channel = Arc::new(WaitChannel::new());
    let ticket = channel.ticket();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let channel = Arc::clone(&channel);
            thread::spawn(move || channel.wait(ticket))
        })
        .collect();

    wait_for_sleepers(&channel, 4);
    channel.wake_all();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(channel.sleepers(), 0);
}

#[test]
fn once_cell_set_only_once() {
    let cell = SyncOnceCell::new();
    assert!(cell.get().is_none());
    assert_eq!(cell.set(7u32), Ok(()));
    assert_eq!(cell.set(8u32), Err(8));
    assert_eq!(cell.get(), Some(&7));
    assert_eq!(*cell.get_or_init(|| 9), 7);
}
