//! The per-process router: owns every local endpoint and every channel
//! to a peer node, and runs the invitation handshake.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use mage_base::{IoLoop, Task, TaskRunner};

use crate::channel::{Channel, ChannelDelegate};
use crate::core::Core;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::handles::MessagePipe;
use crate::message::{
    AcceptInvitationBody, Address, EndpointName, InvitationBody, Message, MessageKind, NodeName,
    INIT_NODE_NAME,
};

/// Held from the moment `send_invitation` sends its `SendInvitation`
/// until the matching `AcceptInvitation` arrives. The reserved `remote`
/// endpoint itself needs no bookkeeping here — `send_invitation` already
/// registered it in `local_endpoints`, where it lives on regardless.
struct PendingInvitation {
    on_accepted: Task,
    origin_runner: TaskRunner,
}

struct InvitationAcceptor {
    callback: Box<dyn Fn(MessagePipe) -> Task + Send + Sync>,
    origin_runner: TaskRunner,
}

/// A node never owns its `Core` (`Core` owns `Node`); it reaches back
/// through this weak reference whenever it needs the handle table, so
/// a process can in principle hold more than one independent
/// node/core pair (useful for tests that stand in for two processes).
pub struct Node {
    pub name: NodeName,
    local_endpoints: Mutex<HashMap<EndpointName, Arc<Endpoint>>>,
    node_channels: Mutex<HashMap<NodeName, Arc<Channel>>>,
    pending_invitations: Mutex<HashMap<NodeName, PendingInvitation>>,
    accepted_invitation: AtomicBool,
    invitation_acceptor: Mutex<Option<InvitationAcceptor>>,
    io_loop: Arc<IoLoop>,
    core: Weak<Core>,
}

impl Node {
    pub(crate) fn new(io_loop: Arc<IoLoop>, core: Weak<Core>) -> Arc<Self> {
        Arc::new(Self {
            name: NodeName::generate(),
            local_endpoints: Mutex::new(HashMap::new()),
            node_channels: Mutex::new(HashMap::new()),
            pending_invitations: Mutex::new(HashMap::new()),
            accepted_invitation: AtomicBool::new(false),
            invitation_acceptor: Mutex::new(None),
            io_loop,
            core,
        })
    }

    fn core(&self) -> Arc<Core> {
        self.core
            .upgrade()
            .expect("Node outlived the Core that owns it")
    }

    pub fn local_endpoint(&self, name: EndpointName) -> Option<Arc<Endpoint>> {
        self.local_endpoints.lock().unwrap().get(&name).cloned()
    }

    pub fn register_local_endpoint(&self, endpoint: Arc<Endpoint>) {
        self.local_endpoints.lock().unwrap().insert(endpoint.name, endpoint);
    }

    /// §4.8.a: two fresh, mutually entangled endpoints, both local.
    pub fn create_message_pipes(self: &Arc<Self>) -> (Arc<Endpoint>, Arc<Endpoint>) {
        let a_name = EndpointName::generate();
        let b_name = EndpointName::generate();
        let a = Endpoint::new(
            a_name,
            Address {
                node_name: self.name,
                endpoint_name: b_name,
            },
        );
        let b = Endpoint::new(
            b_name,
            Address {
                node_name: self.name,
                endpoint_name: a_name,
            },
        );
        self.register_local_endpoint(a.clone());
        self.register_local_endpoint(b.clone());
        (a, b)
    }

    /// §4.8.b. `on_accepted` runs on whichever loop's task runner is
    /// current when `send_invitation` is called, once the matching
    /// `AcceptInvitation` arrives (mirrors `accept_invitation`'s
    /// `on_invitation` callback on the other side of the handshake).
    pub fn send_invitation(self: &Arc<Self>, fd: RawFd, on_accepted: Task) -> Result<Arc<Endpoint>> {
        let origin_runner = mage_base::scheduling_handles::current_task_runner()
            .ok_or(Error::Invariant("send_invitation requires a current task loop"))?;
        let temp = NodeName::generate();
        let remote_name = EndpointName::generate();
        let local_name = EndpointName::generate();

        let remote = Endpoint::new(
            remote_name,
            Address {
                node_name: self.name,
                endpoint_name: local_name,
            },
        );
        let local = Endpoint::new(
            local_name,
            Address {
                node_name: temp,
                endpoint_name: remote_name,
            },
        );
        self.register_local_endpoint(remote.clone());
        self.register_local_endpoint(local.clone());

        let channel = Channel::new(
            fd,
            self.io_loop.clone(),
            temp,
            Arc::downgrade(self) as std::sync::Weak<dyn ChannelDelegate>,
        );
        channel.start()?;
        channel.send_invitation(&InvitationBody {
            inviter_name: self.name,
            temporary_remote_node_name: temp,
            intended_endpoint_name: remote_name,
            intended_peer_endpoint_name: local_name,
        })?;

        self.node_channels.lock().unwrap().insert(temp, channel);
        self.pending_invitations.lock().unwrap().insert(
            temp,
            PendingInvitation {
                on_accepted,
                origin_runner,
            },
        );

        Ok(local)
    }

    /// §4.8.c, the accepting side's setup; `on_invitation` is called once
    /// `SendInvitation` arrives, producing a task posted to whichever
    /// loop's task runner was current when `accept_invitation` was called.
    pub fn accept_invitation(
        self: &Arc<Self>,
        fd: RawFd,
        on_invitation: impl Fn(MessagePipe) -> Task + Send + Sync + 'static,
    ) -> Result<()> {
        if self.accepted_invitation.swap(true, Ordering::SeqCst) {
            return Err(Error::Invariant("accept_invitation called more than once"));
        }
        let origin_runner = mage_base::scheduling_handles::current_task_runner()
            .ok_or(Error::Invariant("accept_invitation requires a current task loop"))?;
        *self.invitation_acceptor.lock().unwrap() = Some(InvitationAcceptor {
            callback: Box::new(on_invitation),
            origin_runner,
        });

        let channel = Channel::new(
            fd,
            self.io_loop.clone(),
            INIT_NODE_NAME,
            Arc::downgrade(self) as std::sync::Weak<dyn ChannelDelegate>,
        );
        channel.start()?;
        self.node_channels.lock().unwrap().insert(INIT_NODE_NAME, channel);
        Ok(())
    }

    pub fn channel_for(&self, node_name: NodeName) -> Option<Arc<Channel>> {
        self.node_channels.lock().unwrap().get(&node_name).cloned()
    }

    /// §4.7's `UnboundProxying` branch calls this (via the closure handed
    /// to `Endpoint::accept_message`/`set_proxying`) to forward a message
    /// on toward its new owner.
    pub fn forward_message(&self, target_node: NodeName, message: Message) -> Result<()> {
        if target_node == self.name {
            if let Some(endpoint) = self.local_endpoint(message.header.target_endpoint) {
                self.dispatch_to_endpoint(&endpoint, message);
            } else {
                log::warn!("forward_message: unknown local target, dropping");
            }
            Ok(())
        } else {
            let channel = self
                .channel_for(target_node)
                .ok_or(Error::UnknownTarget)?;
            channel.send_message(&message)
        }
    }

    /// Runs §4.7's `accept_message` dispatch, re-entering `forward_message`
    /// for however many proxy hops the message needs to cross.
    fn dispatch_to_endpoint(&self, endpoint: &Arc<Endpoint>, message: Message) {
        endpoint.accept_message(message, |proxying_endpoint, forwarded| {
            if let Some(target) = proxying_endpoint.proxy_target() {
                let _ = self.forward_message(target.node_name, forwarded);
            }
        });
    }

    fn handle_send_invitation(&self, body: InvitationBody) -> Result<()> {
        {
            let mut channels = self.node_channels.lock().unwrap();
            if let Some(channel) = channels.remove(&INIT_NODE_NAME) {
                channel.set_remote_node_name(body.inviter_name);
                channels.insert(body.inviter_name, channel);
            }
        }

        let new_endpoint = Endpoint::new(
            body.intended_endpoint_name,
            Address {
                node_name: body.inviter_name,
                endpoint_name: body.intended_peer_endpoint_name,
            },
        );
        self.register_local_endpoint(new_endpoint.clone());

        let handle = self.core().register_endpoint(new_endpoint);

        if let Some(acceptor) = self.invitation_acceptor.lock().unwrap().take() {
            let task = (acceptor.callback)(handle);
            acceptor.origin_runner.post_task(task);
        }

        let channel = self
            .channel_for(body.inviter_name)
            .ok_or(Error::UnknownTarget)?;
        channel.send_accept_invitation(&AcceptInvitationBody {
            temporary_remote_node_name: body.temporary_remote_node_name,
            actual_node_name: self.name,
        })
    }

    fn handle_accept_invitation(&self, body: AcceptInvitationBody) {
        let temp = body.temporary_remote_node_name;
        let actual = body.actual_node_name;

        {
            let mut channels = self.node_channels.lock().unwrap();
            if let Some(channel) = channels.remove(&temp) {
                channel.set_remote_node_name(actual);
                channels.insert(actual, channel);
            }
        }

        if let Some(pending) = self.pending_invitations.lock().unwrap().remove(&temp) {
            pending.origin_runner.post_task(pending.on_accepted);
        }

        for endpoint in self.local_endpoints.lock().unwrap().values() {
            let peer = endpoint.peer_address();
            if peer.node_name == temp {
                endpoint.set_peer_address(Address {
                    node_name: actual,
                    endpoint_name: peer.endpoint_name,
                });
            }
        }
    }

    /// §4.8.e / §4.7 entry point 1: a message that arrived over the
    /// wire. Every descriptor names an endpoint that does not yet exist
    /// in this process, so each is freshly created.
    fn accept_message_on_io_thread(&self, mut message: Message) {
        let Some(endpoint) = self.local_endpoint(message.header.target_endpoint) else {
            log::warn!("on_received_message: unknown target endpoint, dropping");
            return;
        };

        let core = self.core();
        let mut attached = Vec::with_capacity(message.descriptors.len());
        for descriptor in &message.descriptors {
            attached.push(core.recover_new_from_descriptor(*descriptor));
        }
        message.attached_handles = attached;
        self.dispatch_to_endpoint(&endpoint, message);
    }

    /// §4.7 entry point 2: a message routed to a same-process endpoint.
    /// Every descriptor must already name an endpoint registered in this
    /// process; a miss is `Corrupt`, not a fresh creation.
    pub(crate) fn accept_message_on_delegate_thread(&self, mut message: Message) -> Result<()> {
        let endpoint = self
            .local_endpoint(message.header.target_endpoint)
            .ok_or(Error::UnknownTarget)?;

        let core = self.core();
        let mut attached = Vec::with_capacity(message.descriptors.len());
        for descriptor in &message.descriptors {
            attached.push(core.recover_existing_from_descriptor(*descriptor)?);
        }
        message.attached_handles = attached;
        self.dispatch_to_endpoint(&endpoint, message);
        Ok(())
    }
}

impl ChannelDelegate for Node {
    fn on_received_message(&self, _channel_remote_node_name: NodeName, message: Message) {
        match message.header.message_kind {
            MessageKind::SendInvitation => {
                let mut payload = message.payload;
                match InvitationBody::read_from(&mut payload) {
                    Ok(body) => {
                        if let Err(e) = self.handle_send_invitation(body) {
                            log::warn!("failed to handle SendInvitation: {e}");
                        }
                    }
                    Err(e) => log::warn!("malformed SendInvitation body: {e}"),
                }
            }
            MessageKind::AcceptInvitation => {
                let mut payload = message.payload;
                match AcceptInvitationBody::read_from(&mut payload) {
                    Ok(body) => self.handle_accept_invitation(body),
                    Err(e) => log::warn!("malformed AcceptInvitation body: {e}"),
                }
            }
            MessageKind::UserMessage => self.accept_message_on_io_thread(message),
        }
    }

    fn on_channel_error(&self, channel_remote_node_name: NodeName, error: Error) {
        log::warn!("channel to {channel_remote_node_name:?} failed: {error}");
        self.node_channels.lock().unwrap().remove(&channel_remote_node_name);
    }
}
