//! The byte-level transport bound to one OS fd. Frames messages in and
//! out of the fd's non-blocking byte stream and hands parsed messages to
//! a delegate.

use std::os::unix::io::RawFd;
use std::sync::Arc;

use bytes::BytesMut;
use mage_base::IoLoop;

use crate::error::{Error, Result};
use crate::message::{
    AcceptInvitationBody, EndpointName, InvitationBody, Message, MessageHeader, NodeName,
    HEADER_LEN,
};

pub trait ChannelDelegate: Send + Sync {
    fn on_received_message(&self, channel_remote_node_name: NodeName, message: Message);
    /// Called once, the first (and only) time a transport error occurs;
    /// the channel is unusable afterward.
    fn on_channel_error(&self, channel_remote_node_name: NodeName, error: Error);
}

struct State {
    remote_node_name: NodeName,
    read_buffer: BytesMut,
}

/// Owns one fd for the lifetime of the channel; closed on drop.
pub struct Channel {
    fd: RawFd,
    io_loop: Arc<IoLoop>,
    delegate: std::sync::Weak<dyn ChannelDelegate>,
    state: std::sync::Mutex<State>,
}

impl Channel {
    pub fn new(
        fd: RawFd,
        io_loop: Arc<IoLoop>,
        initial_remote_node_name: NodeName,
        delegate: std::sync::Weak<dyn ChannelDelegate>,
    ) -> Arc<Self> {
        Arc::new(Self {
            fd,
            io_loop,
            delegate,
            state: std::sync::Mutex::new(State {
                remote_node_name: initial_remote_node_name,
                read_buffer: BytesMut::new(),
            }),
        })
    }

    pub fn remote_node_name(&self) -> NodeName {
        self.state.lock().unwrap().remote_node_name
    }

    pub fn set_remote_node_name(&self, name: NodeName) {
        self.state.lock().unwrap().remote_node_name = name;
    }

    /// Registers this channel's fd with its IO loop. Must be called
    /// exactly once, before any `send_*` call.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let this = self.clone();
        self.io_loop
            .watch_fd(self.fd, move || this.on_readable())
            .map_err(Error::Scheduling)
    }

    pub fn send_invitation(&self, body: &InvitationBody) -> Result<()> {
        let message = Message::user_message_raw(
            crate::message::MessageKind::SendInvitation,
            EndpointName([0; 15]),
            body.encode(),
        );
        self.write_message(&message)
    }

    pub fn send_accept_invitation(&self, body: &AcceptInvitationBody) -> Result<()> {
        let message = Message::user_message_raw(
            crate::message::MessageKind::AcceptInvitation,
            EndpointName([0; 15]),
            body.encode(),
        );
        self.write_message(&message)
    }

    pub fn send_message(&self, message: &Message) -> Result<()> {
        self.write_message(message)
    }

    fn write_message(&self, message: &Message) -> Result<()> {
        let encoded = message.encode();
        self.write_all(&encoded)
    }

    fn write_all(&self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = unsafe {
                libc::write(
                    self.fd,
                    data.as_ptr() as *const libc::c_void,
                    data.len(),
                )
            };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    // The socket send buffer is full. There's no
                    // writable-readiness wait wired up here (the reactor
                    // only watches for readability), so yield instead of
                    // busy-spinning a core while the peer drains it.
                    std::thread::yield_now();
                    continue;
                }
                return Err(Error::Transport(err));
            }
            data = &data[n as usize..];
        }
        Ok(())
    }

    /// Reads whatever is currently available, accumulates it, and
    /// dispatches every complete framed message the accumulated buffer
    /// now contains. Called by the IO loop when the fd is readable.
    fn on_readable(&self) {
        let mut chunk = [0u8; 4096];
        loop {
            let n = unsafe {
                libc::read(self.fd, chunk.as_mut_ptr() as *mut libc::c_void, chunk.len())
            };
            if n > 0 {
                self.state.lock().unwrap().read_buffer.extend_from_slice(&chunk[..n as usize]);
                continue;
            }
            if n == 0 {
                self.fail(Error::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed the channel",
                )));
                return;
            }
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                break;
            }
            self.fail(Error::Transport(err));
            return;
        }
        self.drain_complete_messages();
    }

    fn drain_complete_messages(&self) {
        loop {
            let message = {
                let mut state = self.state.lock().unwrap();
                if state.read_buffer.len() < HEADER_LEN {
                    return;
                }
                let mut peek = state.read_buffer.clone().freeze();
                let header = match MessageHeader::read_from(&mut peek) {
                    Ok(header) => header,
                    Err(e) => {
                        drop(state);
                        self.fail(e);
                        return;
                    }
                };
                let total = header.total_size as usize;
                if state.read_buffer.len() < total {
                    return;
                }
                let framed = state.read_buffer.split_to(total).freeze();
                match Message::decode(framed) {
                    Ok(message) => message,
                    Err(e) => {
                        drop(state);
                        self.fail(e);
                        return;
                    }
                }
            };
            let remote_node_name = self.remote_node_name();
            if let Some(delegate) = self.delegate.upgrade() {
                delegate.on_received_message(remote_node_name, message);
            }
        }
    }

    fn fail(&self, error: Error) {
        let remote_node_name = self.remote_node_name();
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.on_channel_error(remote_node_name, error);
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let _ = self.io_loop.unwatch_fd(self.fd);
        unsafe {
            libc::close(self.fd);
        }
    }
}
