use bitflags::bitflags;

bitflags! {
    /// Per-socket event word.
    ///
    /// The stack recomputes the word after every state transition; user
    /// tasks wait on a masked subset of it. The flags describe level
    /// conditions, not edges: `TX_READY` stays set for as long as the
    /// transmit buffer has room.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Events: u16 {
        /// The connection reached a synchronized state.
        const CONNECTED   = 0x0001;
        /// The connection is gone, gracefully or by reset.
        const CLOSED      = 0x0002;
        /// The transmit buffer can absorb more data.
        const TX_READY    = 0x0004;
        /// Everything handed to the socket has been transmitted.
        const TX_DONE     = 0x0008;
        /// Everything transmitted has also been acknowledged.
        const TX_ACKED    = 0x0010;
        /// The send direction is shut down.
        const TX_SHUTDOWN = 0x0020;
        /// Data (or an end-of-stream condition) is ready to read.
        const RX_READY    = 0x0040;
        /// The receive direction is shut down.
        const RX_SHUTDOWN = 0x0080;
        /// A listening socket holds at least one pending connection.
        const ACCEPT      = 0x0100;
        /// The bound interface reports link up.
        const LINK_UP     = 0x0200;
        /// The bound interface reports link down.
        const LINK_DOWN   = 0x0400;
    }
}
