//! Process-wide facade: the handle table plus the operations generated
//! proxy/stub code actually calls. Initialized once via [`init`]; after
//! that, [`global`] is the only way application code reaches it, per the
//! explicit-init-then-global-convenience pattern.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use bytes::Bytes;
use mage_base::{IoLoop, Task, TaskRunner};

use crate::endpoint::{Delegate, Endpoint, EndpointState};
use crate::error::{Error, Result};
use crate::handles::MessagePipe;
use crate::message::{Address, EndpointDescriptor, EndpointName, Message};
use crate::node::Node;

static CORE: OnceLock<Arc<Core>> = OnceLock::new();

pub struct Core {
    node: Arc<Node>,
    handle_table: Mutex<HashMap<MessagePipe, Arc<Endpoint>>>,
    next_handle: AtomicU32,
}

/// Builds the process's `Core` on `io_loop` and installs it as the
/// global singleton. Must be called at most once; subsequent calls
/// return the already-installed instance rather than rebuilding it.
///
/// `Core` itself has no hidden process-global state (see [`Core::new`]);
/// `init`/`global` are a thin convenience layer for application code
/// that only ever wants one. Generated proxy/stub code is the expected
/// caller of `global`.
pub fn init(io_loop: Arc<IoLoop>) -> Arc<Core> {
    CORE.get_or_init(|| Core::new(io_loop)).clone()
}

/// Returns the process's `Core`.
///
/// # Panics
/// Panics if [`init`] has not yet been called. Like its C++ ancestor,
/// this is a programmer error: every entry point below assumes the
/// runtime has been initialized before use.
pub fn global() -> Arc<Core> {
    CORE.get()
        .expect("mage::core::init must be called before use")
        .clone()
}

impl Core {
    /// Builds a standalone `Core`/`Node` pair on `io_loop`. Ordinary
    /// application code should go through [`init`]/[`global`] instead;
    /// this is exposed directly so tests can hold two independent
    /// instances in one process to stand in for two machines.
    pub fn new(io_loop: Arc<IoLoop>) -> Arc<Self> {
        Arc::new_cyclic(|weak_core| Self {
            node: Node::new(io_loop, weak_core.clone()),
            handle_table: Mutex::new(HashMap::new()),
            next_handle: AtomicU32::new(1),
        })
    }

    fn allocate_handle(&self) -> MessagePipe {
        MessagePipe::new(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a freshly created endpoint and returns its handle.
    pub(crate) fn register_endpoint(&self, endpoint: Arc<Endpoint>) -> MessagePipe {
        let handle = self.allocate_handle();
        self.handle_table.lock().unwrap().insert(handle, endpoint);
        handle
    }

    fn lookup(&self, handle: MessagePipe) -> Result<Arc<Endpoint>> {
        self.handle_table
            .lock()
            .unwrap()
            .get(&handle)
            .cloned()
            .ok_or(Error::UnknownTarget)
    }

    pub fn create_message_pipes(&self) -> (MessagePipe, MessagePipe) {
        let (a, b) = self.node.create_message_pipes();
        (self.register_endpoint(a), self.register_endpoint(b))
    }

    pub fn send_invitation(&self, fd: RawFd, on_accepted: Task) -> Result<MessagePipe> {
        let local = self.node.send_invitation(fd, on_accepted)?;
        Ok(self.register_endpoint(local))
    }

    pub fn accept_invitation(
        &self,
        fd: RawFd,
        on_invitation: impl Fn(MessagePipe) -> Task + Send + Sync + 'static,
    ) -> Result<()> {
        self.node.accept_invitation(fd, on_invitation)
    }

    /// §4.8.d. `handles_to_transfer` are sent inline with the message;
    /// each must currently be `UnboundQueueing` on this process.
    pub fn send_message(
        &self,
        handle: MessagePipe,
        payload: Bytes,
        handles_to_transfer: &[MessagePipe],
    ) -> Result<()> {
        let endpoint = self.lookup(handle)?;
        let peer = endpoint.peer_address();

        let mut descriptors = Vec::with_capacity(handles_to_transfer.len());
        let mut transferred = Vec::with_capacity(handles_to_transfer.len());
        for &carried_handle in handles_to_transfer {
            let carried = self.lookup(carried_handle)?;
            let descriptor = self.populate_endpoint_descriptor(&carried)?;
            descriptors.push(descriptor);
            transferred.push((carried, descriptor));
        }

        let message = Message::user_message(peer.endpoint_name, payload).with_descriptors(descriptors);

        for (carried, descriptor) in transferred {
            carried.set_proxying(
                Address {
                    node_name: peer.node_name,
                    endpoint_name: descriptor.cross_node_endpoint_name,
                },
                |proxying, forwarded| {
                    if let Some(target) = proxying.proxy_target() {
                        let _ = self.forward_for_proxy(target.node_name, forwarded);
                    }
                },
            );
        }

        if peer.node_name == self.node.name {
            self.node.accept_message_on_delegate_thread(message)
        } else {
            let channel = self
                .node
                .channel_for(peer.node_name)
                .ok_or(Error::UnknownTarget)?;
            channel.send_message(&message)
        }
    }

    fn forward_for_proxy(&self, target_node: crate::message::NodeName, message: Message) -> Result<()> {
        self.node.forward_message(target_node, message)
    }

    /// §8.4.d's descriptor rules: a handle whose endpoint is `Bound`
    /// cannot be sent (`HandleInUse`); one already `UnboundProxying`
    /// cannot be sent again (`HandleTransferred`).
    pub fn populate_endpoint_descriptor(
        &self,
        carrier: &Arc<Endpoint>,
    ) -> Result<EndpointDescriptor> {
        match carrier.state() {
            EndpointState::Bound => return Err(Error::HandleInUse),
            EndpointState::UnboundProxying => return Err(Error::HandleTransferred),
            EndpointState::UnboundQueueing => {}
        }
        let peer = carrier.peer_address();
        Ok(EndpointDescriptor {
            endpoint_name: carrier.name,
            cross_node_endpoint_name: EndpointName::generate(),
            peer_node_name: peer.node_name,
            peer_endpoint_name: peer.endpoint_name,
        })
    }

    pub fn bind_receiver(
        &self,
        handle: MessagePipe,
        delegate: Weak<dyn Delegate>,
        runner: TaskRunner,
    ) -> Result<()> {
        let endpoint = self.lookup(handle)?;
        endpoint.register_delegate(delegate, runner);
        Ok(())
    }

    /// Used on the IO thread when a descriptor names an endpoint that
    /// does not yet exist in this process (the ordinary cross-node
    /// transfer case).
    pub(crate) fn recover_new_from_descriptor(&self, descriptor: EndpointDescriptor) -> MessagePipe {
        let endpoint = Endpoint::new(
            descriptor.cross_node_endpoint_name,
            Address {
                node_name: descriptor.peer_node_name,
                endpoint_name: descriptor.peer_endpoint_name,
            },
        );
        self.node.register_local_endpoint(endpoint.clone());
        self.register_endpoint(endpoint)
    }

    /// Used on the delegate thread when a descriptor is expected to
    /// already name a locally registered endpoint (a same-process
    /// transfer). Failing to find it is `Corrupt`.
    pub(crate) fn recover_existing_from_descriptor(
        &self,
        descriptor: EndpointDescriptor,
    ) -> Result<MessagePipe> {
        let endpoint = self
            .node
            .local_endpoint(descriptor.endpoint_name)
            .ok_or(Error::Corrupt)?;
        Ok(self.register_endpoint(endpoint))
    }
}
