/// Capability and addressing information exchanged between peers immediately after a connection is
/// established, and again on push/delta updates.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Identify {
    /// Raw bytes of the sender's public key. May be empty on an insecure transport.
    #[prost(bytes, tag = "1")]
    pub public_key: std::vec::Vec<u8>,
    /// Multiaddr bytes the sender is listening on. Empty when a signed peer record is sent instead.
    #[prost(bytes, repeated, tag = "2")]
    pub listen_addrs: ::std::vec::Vec<std::vec::Vec<u8>>,
    /// Protocols the sender currently handles.
    #[prost(string, repeated, tag = "3")]
    pub protocols: ::std::vec::Vec<std::string::String>,
    /// The multiaddr the sender observed this message's recipient dialing from.
    #[prost(bytes, tag = "4")]
    pub observed_addr: std::vec::Vec<u8>,
    #[prost(string, tag = "5")]
    pub protocol_version: std::string::String,
    #[prost(string, tag = "6")]
    pub agent_version: std::string::String,
    /// Protocol additions/removals since the last full message. Only set on the delta protocol.
    #[prost(message, optional, tag = "7")]
    pub delta: ::std::option::Option<Delta>,
    /// Serialized signed envelope binding the sender's identity to its addresses.
    #[prost(bytes, tag = "8")]
    pub signed_peer_record: std::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Delta {
    /// Protocols now handled that were not in the last full message
    #[prost(string, repeated, tag = "1")]
    pub added_protocols: ::std::vec::Vec<std::string::String>,
    /// Protocols no longer handled
    #[prost(string, repeated, tag = "2")]
    pub rm_protocols: ::std::vec::Vec<std::string::String>,
}
/// A signed, self-certifying envelope.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    /// Public key that produced `signature`
    #[prost(bytes, tag = "1")]
    pub public_key: std::vec::Vec<u8>,
    /// Domain string identifying the payload format
    #[prost(bytes, tag = "2")]
    pub payload_type: std::vec::Vec<u8>,
    #[prost(bytes, tag = "3")]
    pub payload: std::vec::Vec<u8>,
    #[prost(bytes, tag = "5")]
    pub signature: std::vec::Vec<u8>,
}
/// Payload of a signed peer record envelope.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerRecord {
    /// Node id derived from the envelope's public key
    #[prost(bytes, tag = "1")]
    pub peer_id: std::vec::Vec<u8>,
    /// Strictly increasing per signer; stale records are rejected
    #[prost(uint64, tag = "2")]
    pub seq: u64,
    #[prost(message, repeated, tag = "3")]
    pub addresses: ::std::vec::Vec<peer_record::AddressInfo>,
}
pub mod peer_record {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct AddressInfo {
        #[prost(bytes, tag = "1")]
        pub multiaddr: std::vec::Vec<u8>,
    }
}
