//! S1 (invitation handshake plus an RPC-shaped exchange over the
//! resulting pipe) and S4 (transferring a handle inline in a message),
//! each driven across two independent `Core`/`Node` pairs standing in
//! for two separate processes connected by a socket pair.

use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use mage::{Core, Delegate, Message};
use mage_base::scheduling_handles::set_current_task_loop;
use mage_base::task_loop::{TaskLoop, WorkerLoop};
use mage_base::{IoLoop, Task};

struct Recorder {
    seen: Mutex<Vec<Message>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl Delegate for Recorder {
    fn on_received_message(&self, message: Message) {
        self.seen.lock().unwrap().push(message);
    }
}

/// Gives the loopback socket's readiness edge a chance to settle, then
/// drains whatever each IO loop already has. A single pass occasionally
/// races the `epoll_ctl` registration against the peer's write.
fn pump(io: &Arc<IoLoop>) {
    io.run_until_idle();
    std::thread::sleep(Duration::from_millis(20));
    io.run_until_idle();
}

fn method1() -> Bytes {
    Bytes::from_static(b"Method1(101, 0.78, some text)")
}

fn send_money() -> Bytes {
    Bytes::from_static(b"SendMoney(5000, USD)")
}

fn quit() -> Bytes {
    Bytes::from_static(b"Quit()")
}

#[test]
fn invitation_handshake_then_ordered_rpc_then_handle_transfer() {
    let parent_io = IoLoop::new().unwrap();
    let parent_core = Core::new(parent_io.clone());
    let parent_ui: Arc<dyn TaskLoop> = WorkerLoop::new();

    let child_io = IoLoop::new().unwrap();
    let child_core = Core::new(child_io.clone());
    let child_ui: Arc<dyn TaskLoop> = WorkerLoop::new();

    let (parent_sock, child_sock) = UnixStream::pair().unwrap();
    parent_sock.set_nonblocking(true).unwrap();
    child_sock.set_nonblocking(true).unwrap();
    let parent_fd = parent_sock.as_raw_fd();
    let child_fd = child_sock.as_raw_fd();
    std::mem::forget(parent_sock);
    std::mem::forget(child_sock);

    // --- S1: invitation handshake ---
    let accepted = Arc::new(AtomicBool::new(false));
    let accepted_clone = accepted.clone();
    set_current_task_loop(&parent_ui);
    let h = parent_core
        .send_invitation(parent_fd, Task::new(move || accepted_clone.store(true, Ordering::SeqCst)))
        .unwrap();

    let recorder_child = Recorder::new();
    let recorder_child_for_closure = recorder_child.clone();
    let child_core_for_closure = child_core.clone();
    let child_worker = WorkerLoop::new();
    let child_worker_for_closure = child_worker.clone();
    set_current_task_loop(&child_ui);
    child_core
        .accept_invitation(child_fd, move |handle| {
            let recorder = recorder_child_for_closure.clone();
            let core = child_core_for_closure.clone();
            let runner = child_worker_for_closure.task_runner();
            Task::new(move || {
                core.bind_receiver(handle, Arc::downgrade(&recorder) as _, runner)
                    .unwrap();
            })
        })
        .unwrap();

    pump(&child_io);
    child_ui.run_until_idle();
    pump(&parent_io);
    parent_ui.run_until_idle();

    assert!(accepted.load(Ordering::SeqCst), "on_accepted must fire once the handshake completes");

    // --- three ordered RPC-shaped messages over the new pipe ---
    parent_core.send_message(h, method1(), &[]).unwrap();
    parent_core.send_message(h, send_money(), &[]).unwrap();
    parent_core.send_message(h, quit(), &[]).unwrap();

    pump(&child_io);
    child_worker.run_until_idle();

    {
        let seen = recorder_child.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].payload, method1());
        assert_eq!(seen[1].payload, send_money());
        assert_eq!(seen[2].payload, quit());
    }

    // --- S4: transfer a handle inline in a fourth message ---
    let (x, x_peer) = parent_core.create_message_pipes();
    parent_core
        .send_message(h, Bytes::from_static(b"PassHandle"), &[x])
        .unwrap();

    pump(&child_io);
    child_worker.run_until_idle();

    let transferred_handle = {
        let seen = recorder_child.seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[3].attached_handles.len(), 1);
        seen[3].attached_handles[0]
    };

    let recorder_transferred = Recorder::new();
    child_core
        .bind_receiver(
            transferred_handle,
            Arc::downgrade(&recorder_transferred) as _,
            child_worker.task_runner(),
        )
        .unwrap();

    // A message sent by the parent on `x`'s entangled peer is no longer
    // deliverable locally (`x` is now `UnboundProxying`); it must be
    // forwarded across the channel to the endpoint the child just bound.
    parent_core
        .send_message(x_peer, Bytes::from_static(b"after transfer"), &[])
        .unwrap();

    pump(&child_io);
    child_worker.run_until_idle();

    let seen = recorder_transferred.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].payload, Bytes::from_static(b"after transfer"));
}
