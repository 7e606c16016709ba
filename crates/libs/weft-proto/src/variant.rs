//! Tagged package envelope: decode/encode for every wire kind.
//!
//! Decoding reads the integer `type` field first and dispatches to the
//! matching typed struct; anything outside the reserved and gateway ranges
//! is handed back raw as [`Variant::Plugin`] for user-registered handlers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::tree::NodeTree;
use crate::{type_id, ProtoError};

/// Delivery mode carried in every package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Routing {
    /// Direct neighbor exchange, never forwarded (node-sync).
    #[default]
    Neighbor,
    /// Routed hop by hop to `dest`.
    Single,
    /// Flooded to every connection except the inbound one.
    Broadcast,
}

impl Routing {
    pub fn as_u8(self) -> u8 {
        match self {
            Routing::Neighbor => 0,
            Routing::Single => 1,
            Routing::Broadcast => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Routing::Neighbor),
            1 => Some(Routing::Single),
            2 => Some(Routing::Broadcast),
            _ => None,
        }
    }
}

impl Serialize for Routing {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Routing {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        Routing::from_u8(value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid routing value: {value}")))
    }
}

/// Node-sync request/reply body: the sender's advertised subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSyncPackage {
    pub from: u32,
    #[serde(default)]
    pub dest: u32,
    pub routing: Routing,
    #[serde(flatten)]
    pub tree: NodeTree,
}

impl NodeSyncPackage {
    pub fn new(from: u32, dest: u32, tree: NodeTree) -> Self {
        Self { from, dest, routing: Routing::Neighbor, tree }
    }
}

/// Stages of the four-timestamp exchange carried in `msg.type`.
pub const TIME_STAGE_ADOPT_ME: u8 = 0;
pub const TIME_STAGE_REQUEST: u8 = 1;
pub const TIME_STAGE_REPLY: u8 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBody {
    #[serde(rename = "type")]
    pub stage: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t0: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t1: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t2: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSyncPackage {
    pub from: u32,
    #[serde(default)]
    pub dest: u32,
    pub routing: Routing,
    pub msg: TimeBody,
}

impl TimeSyncPackage {
    /// Ask `dest` to start a sync toward us (we keep our time).
    pub fn adopt_me(from: u32, dest: u32) -> Self {
        Self {
            from,
            dest,
            routing: Routing::Single,
            msg: TimeBody { stage: TIME_STAGE_ADOPT_ME, ..TimeBody::default() },
        }
    }

    /// Start a sync: we intend to adopt `dest`'s time.
    pub fn request(from: u32, dest: u32, t0: u32) -> Self {
        Self {
            from,
            dest,
            routing: Routing::Single,
            msg: TimeBody { stage: TIME_STAGE_REQUEST, t0: Some(t0), ..TimeBody::default() },
        }
    }

    pub fn reply(from: u32, dest: u32, t0: u32, t1: u32, t2: u32) -> Self {
        Self {
            from,
            dest,
            routing: Routing::Single,
            msg: TimeBody { stage: TIME_STAGE_REPLY, t0: Some(t0), t1: Some(t1), t2: Some(t2) },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeDelayPackage {
    pub from: u32,
    #[serde(default)]
    pub dest: u32,
    pub routing: Routing,
    pub msg: TimeBody,
}

impl TimeDelayPackage {
    pub fn request(from: u32, dest: u32, t0: u32) -> Self {
        Self {
            from,
            dest,
            routing: Routing::Single,
            msg: TimeBody { stage: TIME_STAGE_REQUEST, t0: Some(t0), ..TimeBody::default() },
        }
    }

    pub fn reply(from: u32, dest: u32, t0: u32, t1: u32, t2: u32) -> Self {
        Self {
            from,
            dest,
            routing: Routing::Single,
            msg: TimeBody { stage: TIME_STAGE_REPLY, t0: Some(t0), t1: Some(t1), t2: Some(t2) },
        }
    }
}

/// User payload routed to one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinglePackage {
    pub from: u32,
    pub dest: u32,
    pub routing: Routing,
    pub msg: String,
}

impl SinglePackage {
    pub fn new(from: u32, dest: u32, msg: String) -> Self {
        Self { from, dest, routing: Routing::Single, msg }
    }
}

/// User payload flooded to the whole mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastPackage {
    pub from: u32,
    #[serde(default)]
    pub dest: u32,
    pub routing: Routing,
    pub msg: String,
}

impl BroadcastPackage {
    pub fn new(from: u32, msg: String) -> Self {
        Self { from, dest: 0, routing: Routing::Broadcast, msg }
    }
}

/// Periodic bridge self-report; also unicast to freshly promoted neighbors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStatusPackage {
    pub from: u32,
    #[serde(default)]
    pub dest: u32,
    pub routing: Routing,
    #[serde(rename = "internetConnected")]
    pub internet_connected: bool,
    #[serde(rename = "routerRSSI", default)]
    pub router_rssi: i8,
    #[serde(rename = "routerChannel", default)]
    pub router_channel: u8,
    #[serde(default)]
    pub uptime: u32,
    #[serde(rename = "gatewayIP", default)]
    pub gateway_ip: String,
    #[serde(default)]
    pub timestamp: u32,
}

/// Candidacy announcement during a bridge election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeElectionPackage {
    pub from: u32,
    #[serde(default)]
    pub dest: u32,
    pub routing: Routing,
    #[serde(rename = "routerRSSI")]
    pub router_rssi: i8,
    #[serde(default)]
    pub uptime: u32,
    #[serde(rename = "freeMemory", default)]
    pub free_memory: u32,
    #[serde(default)]
    pub timestamp: u32,
    #[serde(rename = "routerSSID", default)]
    pub router_ssid: String,
}

/// Announcement that a new node has taken over the bridge role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeTakeoverPackage {
    pub from: u32,
    #[serde(default)]
    pub dest: u32,
    pub routing: Routing,
    #[serde(rename = "previousBridge", default)]
    pub previous_bridge: u32,
    #[serde(default)]
    pub reason: String,
    #[serde(rename = "routerRSSI", default)]
    pub router_rssi: i8,
    #[serde(default)]
    pub timestamp: u32,
}

/// Multi-bridge role/load coordination broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeCoordinationPackage {
    pub from: u32,
    #[serde(default)]
    pub dest: u32,
    pub routing: Routing,
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub load: u8,
    #[serde(default)]
    pub timestamp: u32,
    #[serde(rename = "peerBridges", default, skip_serializing_if = "Vec::is_empty")]
    pub peer_bridges: Vec<u32>,
}

/// Internet-bound request relayed to the mesh's gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayDataPackage {
    pub from: u32,
    pub dest: u32,
    pub routing: Routing,
    #[serde(rename = "msgId")]
    pub message_id: u32,
    pub origin: u32,
    #[serde(default)]
    pub ts: u32,
    #[serde(default)]
    pub prio: u8,
    #[serde(rename = "dest_url", default)]
    pub destination: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default = "default_content_type")]
    pub content: String,
    #[serde(default)]
    pub retry: u8,
    #[serde(default)]
    pub ack: bool,
}

fn default_content_type() -> String {
    "application/json".to_string()
}

/// Delivery confirmation routed back from the gateway to the origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayAckPackage {
    pub from: u32,
    pub dest: u32,
    pub routing: Routing,
    #[serde(rename = "msgId")]
    pub message_id: u32,
    pub origin: u32,
    #[serde(default)]
    pub success: bool,
    #[serde(rename = "http", default)]
    pub http_status: u16,
    #[serde(rename = "err", default)]
    pub error: String,
    #[serde(default)]
    pub ts: u32,
}

/// Liveness beacon broadcast by every active gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayHeartbeatPackage {
    pub from: u32,
    #[serde(default)]
    pub dest: u32,
    pub routing: Routing,
    #[serde(rename = "isPrimary", default)]
    pub is_primary: bool,
    #[serde(rename = "hasInternet", default)]
    pub has_internet: bool,
    #[serde(rename = "routerRSSI", default)]
    pub router_rssi: i8,
    #[serde(default)]
    pub uptime: u32,
    #[serde(default)]
    pub timestamp: u32,
}

/// A user-defined package (`type >= 16`, outside the gateway range),
/// carried as the raw decoded object.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginPackage {
    pub type_id: u16,
    pub from: u32,
    pub dest: u32,
    pub routing: Routing,
    pub raw: Value,
}

/// One decoded wire message of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    NodeSyncRequest(NodeSyncPackage),
    NodeSyncReply(NodeSyncPackage),
    TimeSync(TimeSyncPackage),
    TimeDelay(TimeDelayPackage),
    Single(SinglePackage),
    Broadcast(BroadcastPackage),
    BridgeStatus(BridgeStatusPackage),
    BridgeElection(BridgeElectionPackage),
    BridgeTakeover(BridgeTakeoverPackage),
    BridgeCoordination(BridgeCoordinationPackage),
    GatewayData(GatewayDataPackage),
    GatewayAck(GatewayAckPackage),
    GatewayHeartbeat(GatewayHeartbeatPackage),
    Plugin(PluginPackage),
}

impl Variant {
    /// Decode one JSON object from the wire.
    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        let value: Value = serde_json::from_str(text)?;
        let object = value.as_object().ok_or(ProtoError::NotAnObject)?;
        let kind = object
            .get("type")
            .and_then(Value::as_u64)
            .ok_or(ProtoError::MissingField("type"))? as u16;

        let variant = match kind {
            type_id::NODE_SYNC_REQUEST => {
                Variant::NodeSyncRequest(serde_json::from_value(value)?)
            }
            type_id::NODE_SYNC_REPLY => Variant::NodeSyncReply(serde_json::from_value(value)?),
            type_id::TIME_SYNC => Variant::TimeSync(serde_json::from_value(value)?),
            type_id::TIME_DELAY => Variant::TimeDelay(serde_json::from_value(value)?),
            type_id::SINGLE => Variant::Single(serde_json::from_value(value)?),
            type_id::BROADCAST => Variant::Broadcast(serde_json::from_value(value)?),
            type_id::BRIDGE_STATUS => Variant::BridgeStatus(serde_json::from_value(value)?),
            type_id::BRIDGE_ELECTION => Variant::BridgeElection(serde_json::from_value(value)?),
            type_id::BRIDGE_TAKEOVER => Variant::BridgeTakeover(serde_json::from_value(value)?),
            type_id::BRIDGE_COORDINATION => {
                Variant::BridgeCoordination(serde_json::from_value(value)?)
            }
            type_id::GATEWAY_DATA => Variant::GatewayData(serde_json::from_value(value)?),
            type_id::GATEWAY_ACK => Variant::GatewayAck(serde_json::from_value(value)?),
            type_id::GATEWAY_HEARTBEAT => {
                Variant::GatewayHeartbeat(serde_json::from_value(value)?)
            }
            other if type_id::is_reserved(other) => return Err(ProtoError::UnknownType(other)),
            other => {
                let from = object
                    .get("from")
                    .and_then(Value::as_u64)
                    .ok_or(ProtoError::MissingField("from"))? as u32;
                let dest = object.get("dest").and_then(Value::as_u64).unwrap_or(0) as u32;
                let routing = object
                    .get("routing")
                    .and_then(Value::as_u64)
                    .and_then(|raw| Routing::from_u8(raw as u8))
                    .ok_or(ProtoError::MissingField("routing"))?;
                Variant::Plugin(PluginPackage { type_id: other, from, dest, routing, raw: value })
            }
        };
        Ok(variant)
    }

    /// Encode to the JSON object text that goes on the wire.
    pub fn encode(&self) -> Result<String, ProtoError> {
        let mut value = match self {
            Variant::NodeSyncRequest(pkg) | Variant::NodeSyncReply(pkg) => {
                serde_json::to_value(pkg)?
            }
            Variant::TimeSync(pkg) => serde_json::to_value(pkg)?,
            Variant::TimeDelay(pkg) => serde_json::to_value(pkg)?,
            Variant::Single(pkg) => serde_json::to_value(pkg)?,
            Variant::Broadcast(pkg) => serde_json::to_value(pkg)?,
            Variant::BridgeStatus(pkg) => serde_json::to_value(pkg)?,
            Variant::BridgeElection(pkg) => serde_json::to_value(pkg)?,
            Variant::BridgeTakeover(pkg) => serde_json::to_value(pkg)?,
            Variant::BridgeCoordination(pkg) => serde_json::to_value(pkg)?,
            Variant::GatewayData(pkg) => serde_json::to_value(pkg)?,
            Variant::GatewayAck(pkg) => serde_json::to_value(pkg)?,
            Variant::GatewayHeartbeat(pkg) => serde_json::to_value(pkg)?,
            Variant::Plugin(pkg) => pkg.raw.clone(),
        };
        if let Some(object) = value.as_object_mut() {
            object.insert("type".to_string(), Value::from(self.type_id()));
        }
        Ok(serde_json::to_string(&value)?)
    }

    pub fn type_id(&self) -> u16 {
        match self {
            Variant::NodeSyncRequest(_) => type_id::NODE_SYNC_REQUEST,
            Variant::NodeSyncReply(_) => type_id::NODE_SYNC_REPLY,
            Variant::TimeSync(_) => type_id::TIME_SYNC,
            Variant::TimeDelay(_) => type_id::TIME_DELAY,
            Variant::Single(_) => type_id::SINGLE,
            Variant::Broadcast(_) => type_id::BROADCAST,
            Variant::BridgeStatus(_) => type_id::BRIDGE_STATUS,
            Variant::BridgeElection(_) => type_id::BRIDGE_ELECTION,
            Variant::BridgeTakeover(_) => type_id::BRIDGE_TAKEOVER,
            Variant::BridgeCoordination(_) => type_id::BRIDGE_COORDINATION,
            Variant::GatewayData(_) => type_id::GATEWAY_DATA,
            Variant::GatewayAck(_) => type_id::GATEWAY_ACK,
            Variant::GatewayHeartbeat(_) => type_id::GATEWAY_HEARTBEAT,
            Variant::Plugin(pkg) => pkg.type_id,
        }
    }

    pub fn from(&self) -> u32 {
        match self {
            Variant::NodeSyncRequest(pkg) | Variant::NodeSyncReply(pkg) => pkg.from,
            Variant::TimeSync(pkg) => pkg.from,
            Variant::TimeDelay(pkg) => pkg.from,
            Variant::Single(pkg) => pkg.from,
            Variant::Broadcast(pkg) => pkg.from,
            Variant::BridgeStatus(pkg) => pkg.from,
            Variant::BridgeElection(pkg) => pkg.from,
            Variant::BridgeTakeover(pkg) => pkg.from,
            Variant::BridgeCoordination(pkg) => pkg.from,
            Variant::GatewayData(pkg) => pkg.from,
            Variant::GatewayAck(pkg) => pkg.from,
            Variant::GatewayHeartbeat(pkg) => pkg.from,
            Variant::Plugin(pkg) => pkg.from,
        }
    }

    pub fn dest(&self) -> u32 {
        match self {
            Variant::NodeSyncRequest(pkg) | Variant::NodeSyncReply(pkg) => pkg.dest,
            Variant::TimeSync(pkg) => pkg.dest,
            Variant::TimeDelay(pkg) => pkg.dest,
            Variant::Single(pkg) => pkg.dest,
            Variant::Broadcast(pkg) => pkg.dest,
            Variant::BridgeStatus(pkg) => pkg.dest,
            Variant::BridgeElection(pkg) => pkg.dest,
            Variant::BridgeTakeover(pkg) => pkg.dest,
            Variant::BridgeCoordination(pkg) => pkg.dest,
            Variant::GatewayData(pkg) => pkg.dest,
            Variant::GatewayAck(pkg) => pkg.dest,
            Variant::GatewayHeartbeat(pkg) => pkg.dest,
            Variant::Plugin(pkg) => pkg.dest,
        }
    }

    pub fn routing(&self) -> Routing {
        match self {
            Variant::NodeSyncRequest(pkg) | Variant::NodeSyncReply(pkg) => pkg.routing,
            Variant::TimeSync(pkg) => pkg.routing,
            Variant::TimeDelay(pkg) => pkg.routing,
            Variant::Single(pkg) => pkg.routing,
            Variant::Broadcast(pkg) => pkg.routing,
            Variant::BridgeStatus(pkg) => pkg.routing,
            Variant::BridgeElection(pkg) => pkg.routing,
            Variant::BridgeTakeover(pkg) => pkg.routing,
            Variant::BridgeCoordination(pkg) => pkg.routing,
            Variant::GatewayData(pkg) => pkg.routing,
            Variant::GatewayAck(pkg) => pkg.routing,
            Variant::GatewayHeartbeat(pkg) => pkg.routing,
            Variant::Plugin(pkg) => pkg.routing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_roundtrip() {
        let pkg = SinglePackage::new(1001, 2002, "hello".to_string());
        let wire = Variant::Single(pkg.clone()).encode().expect("encode");
        let back = Variant::decode(&wire).expect("decode");
        assert_eq!(back, Variant::Single(pkg));
    }

    #[test]
    fn node_sync_flattens_the_tree_fields() {
        let mut tree = NodeTree::new(1001);
        tree.root = true;
        tree.subs.push(NodeTree::new(3003));
        let wire = Variant::NodeSyncRequest(NodeSyncPackage::new(1001, 2002, tree))
            .encode()
            .expect("encode");

        let value: Value = serde_json::from_str(&wire).expect("json");
        assert_eq!(value["type"], 3);
        assert_eq!(value["nodeId"], 1001);
        assert_eq!(value["root"], true);
        assert_eq!(value["routing"], 0);
        assert_eq!(value["subs"][0]["nodeId"], 3003);
    }

    #[test]
    fn gateway_data_uses_wire_field_names() {
        let pkg = GatewayDataPackage {
            from: 1001,
            dest: 9009,
            routing: Routing::Single,
            message_id: 0x03E90001,
            origin: 1001,
            ts: 42,
            prio: 2,
            destination: "https://api.example.com/data".to_string(),
            payload: "{\"sensor\":42}".to_string(),
            content: "application/json".to_string(),
            retry: 0,
            ack: true,
        };
        let wire = Variant::GatewayData(pkg.clone()).encode().expect("encode");
        let value: Value = serde_json::from_str(&wire).expect("json");
        assert_eq!(value["type"], 620);
        assert_eq!(value["msgId"], 0x03E90001u32);
        assert_eq!(value["dest_url"], "https://api.example.com/data");
        assert_eq!(value["ack"], true);

        match Variant::decode(&wire).expect("decode") {
            Variant::GatewayData(back) => assert_eq!(back, pkg),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_user_type_decodes_as_plugin() {
        let wire = r#"{"type":23,"from":7,"dest":0,"routing":2,"speed":100}"#;
        match Variant::decode(wire).expect("decode") {
            Variant::Plugin(pkg) => {
                assert_eq!(pkg.type_id, 23);
                assert_eq!(pkg.from, 7);
                assert_eq!(pkg.routing, Routing::Broadcast);
                assert_eq!(pkg.raw["speed"], 100);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn plugin_roundtrip_preserves_custom_fields() {
        let wire = r#"{"type":42,"from":7,"dest":9,"routing":1,"temp":21.5}"#;
        let variant = Variant::decode(wire).expect("decode");
        let encoded = variant.encode().expect("encode");
        let back = Variant::decode(&encoded).expect("decode again");
        assert_eq!(variant, back);
    }

    #[test]
    fn rejects_unknown_reserved_type() {
        let wire = r#"{"type":9,"from":7,"dest":0,"routing":1}"#;
        assert!(matches!(Variant::decode(wire), Err(ProtoError::UnknownType(9))));
    }

    #[test]
    fn rejects_missing_type() {
        let wire = r#"{"from":7,"dest":0,"routing":1}"#;
        assert!(matches!(Variant::decode(wire), Err(ProtoError::MissingField("type"))));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(Variant::decode("{not json").is_err());
        assert!(matches!(Variant::decode("[1,2,3]"), Err(ProtoError::NotAnObject)));
    }

    #[test]
    fn time_sync_stages_roundtrip() {
        let request = TimeSyncPackage::request(1, 2, 1000);
        let wire = Variant::TimeSync(request.clone()).encode().expect("encode");
        let value: Value = serde_json::from_str(&wire).expect("json");
        assert_eq!(value["msg"]["type"], 1);
        assert_eq!(value["msg"]["t0"], 1000);
        assert!(value["msg"].get("t1").is_none());

        let reply = TimeSyncPackage::reply(2, 1, 1000, 1500, 1600);
        let wire = Variant::TimeSync(reply).encode().expect("encode");
        match Variant::decode(&wire).expect("decode") {
            Variant::TimeSync(pkg) => {
                assert_eq!(pkg.msg.stage, TIME_STAGE_REPLY);
                assert_eq!(pkg.msg.t2, Some(1600));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn heartbeat_roundtrip() {
        let pkg = GatewayHeartbeatPackage {
            from: 5005,
            dest: 0,
            routing: Routing::Broadcast,
            is_primary: true,
            has_internet: true,
            router_rssi: -55,
            uptime: 120_000,
            timestamp: 7,
        };
        let wire = Variant::GatewayHeartbeat(pkg.clone()).encode().expect("encode");
        match Variant::decode(&wire).expect("decode") {
            Variant::GatewayHeartbeat(back) => assert_eq!(back, pkg),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn coordination_preserves_peer_list() {
        let pkg = BridgeCoordinationPackage {
            from: 123456,
            dest: 0,
            routing: Routing::Broadcast,
            priority: 10,
            role: "primary".to_string(),
            load: 45,
            timestamp: 987_654_321,
            peer_bridges: vec![111_111, 222_222, 333_333],
        };
        let wire = Variant::BridgeCoordination(pkg.clone()).encode().expect("encode");
        match Variant::decode(&wire).expect("decode") {
            Variant::BridgeCoordination(back) => assert_eq!(back, pkg),
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
