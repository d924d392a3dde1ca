//! Delivery flags carried by every packet.

bitflags::bitflags! {
    /// Bit set of delivery flags. Values match the classic ENet packet flags so
    /// they can be carried on the wire unchanged.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct PacketFlags: u32 {
        /// Delivery requested; an engine may honour it with acknowledgement and resends.
        const RELIABLE = 1 << 0;
        /// Not sequenced with other packets on the channel.
        const UNSEQUENCED = 1 << 1;
        /// Payload was supplied by the caller and is not copied.
        const NO_ALLOCATE = 1 << 2;
        /// Fragmented unreliably if it exceeds the MTU.
        const UNRELIABLE_FRAGMENT = 1 << 3;
        /// Set by the transport once the packet has been handed to the socket.
        const SENT = 1 << 8;
    }
}

impl PacketFlags {
    /// No flags: unreliable, sequenced delivery.
    pub const NONE: Self = Self::empty();
}

impl Default for PacketFlags {
    fn default() -> Self {
        Self::RELIABLE
    }
}
