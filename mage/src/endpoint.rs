//! One side of a pipe: a logical mailbox addressed by `(NodeName,
//! EndpointName)` that queues, delivers, or forwards messages depending
//! on its current state.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use mage_base::TaskRunner;

use crate::error::{Error, Result};
use crate::message::{Address, EndpointName, Message};

/// A delegate consumes messages routed to a bound endpoint. Generated
/// proxy/stub code implements this; the core only ever calls through
/// the trait object.
pub trait Delegate: Send + Sync {
    fn on_received_message(&self, message: Message);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    UnboundQueueing,
    Bound,
    UnboundProxying,
}

struct Inner {
    state: EndpointState,
    incoming_queue: VecDeque<Message>,
    delegate: Option<Weak<dyn Delegate>>,
    delegate_task_runner: Option<TaskRunner>,
    proxy_target: Option<Address>,
}

/// One side of a pipe. `name` and `peer_address` are immutable after
/// construction; everything else lives behind `inner`'s mutex so the
/// three entry points below can be called from any thread.
pub struct Endpoint {
    pub name: EndpointName,
    pub peer_address: std::sync::Mutex<Address>,
    inner: mage_base::sync::Mutex<Inner>,
}

impl Endpoint {
    pub fn new(name: EndpointName, peer_address: Address) -> Arc<Self> {
        Arc::new(Self {
            name,
            peer_address: std::sync::Mutex::new(peer_address),
            inner: mage_base::sync::Mutex::new(Inner {
                state: EndpointState::UnboundQueueing,
                incoming_queue: VecDeque::new(),
                delegate: None,
                delegate_task_runner: None,
                proxy_target: None,
            }),
        })
    }

    pub fn peer_address(&self) -> Address {
        *self.peer_address.lock().unwrap()
    }

    pub fn set_peer_address(&self, address: Address) {
        *self.peer_address.lock().unwrap() = address;
    }

    pub fn state(&self) -> EndpointState {
        self.inner.lock().state
    }

    pub fn proxy_target(&self) -> Option<Address> {
        self.inner.lock().proxy_target
    }

    /// Transitions `UnboundQueueing -> Bound`, then drains
    /// `incoming_queue` in order, posting each queued message to
    /// `runner` before any newly accepted message is dispatched.
    pub fn register_delegate(&self, delegate: Weak<dyn Delegate>, runner: TaskRunner) {
        let mut guard = self.inner.lock();
        guard.state = EndpointState::Bound;
        guard.delegate = Some(delegate.clone());
        guard.delegate_task_runner = Some(runner.clone());
        let queued: Vec<Message> = guard.incoming_queue.drain(..).collect();
        drop(guard);

        for message in queued {
            post_to_delegate(delegate.clone(), &runner, message);
        }
    }

    pub fn unregister_delegate(&self) {
        let mut guard = self.inner.lock();
        guard.state = EndpointState::UnboundQueueing;
        guard.delegate = None;
        guard.delegate_task_runner = None;
    }

    /// Transitions `UnboundQueueing -> UnboundProxying`. Any messages
    /// already queued are forwarded before returning, so they precede
    /// anything accepted after the transition (flushed under the same
    /// lock that performs the transition).
    pub fn set_proxying(
        self: &Arc<Self>,
        target: Address,
        forward: impl Fn(&Arc<Self>, Message),
    ) {
        let mut guard = self.inner.lock();
        guard.state = EndpointState::UnboundProxying;
        guard.proxy_target = Some(target);
        let queued: Vec<Message> = guard.incoming_queue.drain(..).collect();
        drop(guard);

        for mut message in queued {
            message.header.target_endpoint = target.endpoint_name;
            forward(self, message);
        }
    }

    /// Only legal in `UnboundQueueing`; empties and returns the queue.
    pub fn take_queued_messages(&self) -> Result<Vec<Message>> {
        let mut guard = self.inner.lock();
        if guard.state != EndpointState::UnboundQueueing {
            return Err(Error::Corrupt);
        }
        Ok(guard.incoming_queue.drain(..).collect())
    }

    /// Dispatches `message` according to the endpoint's current state.
    /// `forward` is invoked only from the `UnboundProxying` branch, after
    /// the target endpoint field has been rewritten to `proxy_target`.
    pub fn accept_message(self: &Arc<Self>, mut message: Message, forward: impl Fn(&Arc<Self>, Message)) {
        let mut guard = self.inner.lock();
        match guard.state {
            EndpointState::UnboundQueueing => {
                guard.incoming_queue.push_back(message);
            }
            EndpointState::Bound => {
                let delegate = guard.delegate.clone();
                let runner = guard.delegate_task_runner.clone();
                drop(guard);
                if let (Some(delegate), Some(runner)) = (delegate, runner) {
                    post_to_delegate(delegate, &runner, message);
                }
            }
            EndpointState::UnboundProxying => {
                let target = guard.proxy_target.expect("proxy_target set in UnboundProxying");
                drop(guard);
                message.header.target_endpoint = target.endpoint_name;
                forward(self, message);
            }
        }
    }
}

fn post_to_delegate(delegate: Weak<dyn Delegate>, runner: &TaskRunner, message: Message) {
    runner.post(move || {
        if let Some(delegate) = delegate.upgrade() {
            delegate.on_received_message(message);
        }
    });
}

#[cfg(test)]
mod endpoint_test {
    use super::*;
    use crate::message::{EndpointName, NodeName};
    use bytes::Bytes;
    use mage_base::task_loop::{TaskLoop, WorkerLoop};
    use std::sync::{Arc, Mutex};

    fn addr(tag: u8) -> Address {
        Address {
            node_name: NodeName([tag; 15]),
            endpoint_name: EndpointName([tag; 15]),
        }
    }

    struct Recorder {
        seen: Mutex<Vec<Bytes>>,
    }

    impl Delegate for Recorder {
        fn on_received_message(&self, message: Message) {
            self.seen.lock().unwrap().push(message.payload);
        }
    }

    fn msg(tag: u8) -> Message {
        Message::user_message(EndpointName([0; 15]), Bytes::from(vec![tag]))
    }

    #[test]
    fn messages_queue_while_unbound_then_drain_in_order_on_bind() {
        let endpoint = Endpoint::new(EndpointName([1; 15]), addr(2));
        let noop_forward = |_: &Arc<Endpoint>, _: Message| panic!("should not forward");

        endpoint.accept_message(msg(1), noop_forward);
        endpoint.accept_message(msg(2), noop_forward);
        endpoint.accept_message(msg(3), noop_forward);

        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let loop_ = WorkerLoop::new();
        let runner = loop_.task_runner();
        endpoint.register_delegate(Arc::downgrade(&recorder) as Weak<dyn Delegate>, runner);
        loop_.run_until_idle();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(*seen, vec![Bytes::from(vec![1]), Bytes::from(vec![2]), Bytes::from(vec![3])]);
    }

    #[test]
    fn bound_messages_post_to_delegate_runner_not_caller() {
        let endpoint = Endpoint::new(EndpointName([1; 15]), addr(2));
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let loop_ = WorkerLoop::new();
        let runner = loop_.task_runner();
        endpoint.register_delegate(Arc::downgrade(&recorder) as Weak<dyn Delegate>, runner);

        let noop_forward = |_: &Arc<Endpoint>, _: Message| panic!("should not forward");
        endpoint.accept_message(msg(9), noop_forward);
        assert!(recorder.seen.lock().unwrap().is_empty());
        loop_.run_until_idle();
        assert_eq!(*recorder.seen.lock().unwrap(), vec![Bytes::from(vec![9])]);
    }

    #[test]
    fn proxying_flushes_queue_before_accepting_more() {
        let endpoint = Endpoint::new(EndpointName([1; 15]), addr(2));
        let noop_forward = |_: &Arc<Endpoint>, _: Message| panic!("should not forward");
        endpoint.accept_message(msg(1), noop_forward);
        endpoint.accept_message(msg(2), noop_forward);

        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let forwarded_clone = forwarded.clone();
        endpoint.set_proxying(addr(5), move |_, message| {
            forwarded_clone.lock().unwrap().push(message.payload);
        });

        assert_eq!(
            *forwarded.lock().unwrap(),
            vec![Bytes::from(vec![1]), Bytes::from(vec![2])]
        );
        assert_eq!(endpoint.state(), EndpointState::UnboundProxying);

        let forwarded_clone2 = forwarded.clone();
        endpoint.accept_message(msg(3), move |_, message| {
            forwarded_clone2.lock().unwrap().push(message.payload);
        });
        assert_eq!(
            *forwarded.lock().unwrap(),
            vec![Bytes::from(vec![1]), Bytes::from(vec![2]), Bytes::from(vec![3])]
        );
    }
}
