//! Scalability protocols
//!
//! Each socket speaks one protocol. Two sockets can only be connected if
//! their protocols are peers (`req`/`rep`, `push`/`pull`, `bus`/`bus`, ...).
//! Delivery inside the engine is deliberately shallow: messages pass
//! through unchanged, header included, and the protocol only decides which
//! connected peers receive them.

use core::fmt;

/// Protocol spoken by a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// One-to-one, bidirectional
    Pair0,
    /// Many-to-many broadcast
    Bus0,
    /// Load-balanced send side of a pipeline
    Push0,
    /// Receive side of a pipeline
    Pull0,
    /// Broadcast publisher
    Pub0,
    /// Subscriber
    Sub0,
    /// Requester
    Req0,
    /// Replier
    Rep0,
    /// Survey initiator
    Surveyor0,
    /// Survey respondent
    Respondent0,
}

/// How outgoing messages choose their pipes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Routing {
    /// Next pipe with room, rotating; blocks when none has room
    RoundRobin,
    /// Every pipe; peers without room drop the copy
    Broadcast,
    /// Back along the pipe the request arrived on
    Reply,
    /// Sending not supported
    None,
}

impl Protocol {
    /// Every protocol
    pub const ALL: [Protocol; 10] = [
        Protocol::Pair0,
        Protocol::Bus0,
        Protocol::Push0,
        Protocol::Pull0,
        Protocol::Pub0,
        Protocol::Sub0,
        Protocol::Req0,
        Protocol::Rep0,
        Protocol::Surveyor0,
        Protocol::Respondent0,
    ];

    /// Protocol number (`protocol` option)
    pub const fn number(self) -> u16 {
        match self {
            Protocol::Pair0 => 0x10,
            Protocol::Pub0 => 0x20,
            Protocol::Sub0 => 0x21,
            Protocol::Req0 => 0x30,
            Protocol::Rep0 => 0x31,
            Protocol::Push0 => 0x50,
            Protocol::Pull0 => 0x51,
            Protocol::Surveyor0 => 0x62,
            Protocol::Respondent0 => 0x63,
            Protocol::Bus0 => 0x70,
        }
    }

    /// Short name
    pub const fn name(self) -> &'static str {
        match self {
            Protocol::Pair0 => "pair",
            Protocol::Bus0 => "bus",
            Protocol::Push0 => "push",
            Protocol::Pull0 => "pull",
            Protocol::Pub0 => "pub",
            Protocol::Sub0 => "sub",
            Protocol::Req0 => "req",
            Protocol::Rep0 => "rep",
            Protocol::Surveyor0 => "surveyor",
            Protocol::Respondent0 => "respondent",
        }
    }

    /// The protocol a peer must speak
    pub const fn peer(self) -> Protocol {
        match self {
            Protocol::Pair0 => Protocol::Pair0,
            Protocol::Bus0 => Protocol::Bus0,
            Protocol::Push0 => Protocol::Pull0,
            Protocol::Pull0 => Protocol::Push0,
            Protocol::Pub0 => Protocol::Sub0,
            Protocol::Sub0 => Protocol::Pub0,
            Protocol::Req0 => Protocol::Rep0,
            Protocol::Rep0 => Protocol::Req0,
            Protocol::Surveyor0 => Protocol::Respondent0,
            Protocol::Respondent0 => Protocol::Surveyor0,
        }
    }

    /// Whether a socket of this protocol may connect to one of `other`
    pub fn accepts(self, other: Protocol) -> bool {
        self.peer() == other
    }

    /// Whether sockets of this protocol can send
    pub fn can_send(self) -> bool {
        self.routing() != Routing::None
    }

    /// Whether sockets of this protocol can receive
    pub fn can_recv(self) -> bool {
        !matches!(self, Protocol::Push0 | Protocol::Pub0)
    }

    pub(crate) fn routing(self) -> Routing {
        match self {
            Protocol::Pair0 | Protocol::Push0 | Protocol::Req0 => Routing::RoundRobin,
            Protocol::Bus0 | Protocol::Pub0 | Protocol::Surveyor0 => Routing::Broadcast,
            Protocol::Rep0 | Protocol::Respondent0 => Routing::Reply,
            Protocol::Pull0 | Protocol::Sub0 => Routing::None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
