use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::ratelimit::Clock;
use crate::transport::Transport;
use crate::HueError;

/// Manually driven clock. Sleeping advances time instantly, unless the clock
/// is blocking, in which case sleeps never complete.
#[derive(Debug, Default)]
pub struct FakeClock {
    now: AtomicU64,
    blocking: bool,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn blocking() -> Self {
        Self {
            blocking: true,
            ..Self::default()
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now_nanos(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        if self.blocking {
            std::future::pending::<()>().await;
        }
        self.advance(duration);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: &'static str,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
enum Reply {
    Json(Value),
    Fail(fn() -> HueError),
}

/// In-memory [`Transport`] serving canned replies per `METHOD path`.
#[derive(Debug, Default)]
pub struct FakeTransport {
    replies: Mutex<HashMap<String, Reply>>,
    requests: Mutex<Vec<Request>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_get(&self, path: &str, reply: Value) -> &Self {
        self.set("GET", path, Reply::Json(reply))
    }

    pub fn on_put(&self, path: &str, reply: Value) -> &Self {
        self.set("PUT", path, Reply::Json(reply))
    }

    pub fn on_post(&self, path: &str, reply: Value) -> &Self {
        self.set("POST", path, Reply::Json(reply))
    }

    pub fn fail_get(&self, path: &str, error: fn() -> HueError) -> &Self {
        self.set("GET", path, Reply::Fail(error))
    }

    fn set(&self, method: &str, path: &str, reply: Reply) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .insert(format!("{method} {path}"), reply);
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of GETs issued for `path`.
    pub fn gets(&self, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == "GET" && r.path == path)
            .count()
    }

    /// Bodies of all PUT and POST requests, in order.
    pub fn writes(&self) -> Vec<(String, Value)> {
        self.requests()
            .into_iter()
            .filter(|r| r.method != "GET")
            .map(|r| (r.path, r.body.unwrap_or(Value::Null)))
            .collect()
    }

    fn reply(
        &self,
        method: &'static str,
        path: &str,
        body: Option<&Value>,
    ) -> crate::Result<Value> {
        self.requests.lock().unwrap().push(Request {
            method,
            path: path.to_string(),
            body: body.cloned(),
        });
        let reply = self.replies.lock().unwrap().get(&format!("{method} {path}")).cloned();
        match reply {
            Some(Reply::Json(value)) => Ok(value),
            Some(Reply::Fail(error)) => Err(error()),
            None => match method {
                "GET" => Err(HueError::connection_err(format!("no reply for GET {path}"))),
                _ => Ok(Value::Array(Vec::new())),
            },
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, path: &str) -> crate::Result<Value> {
        self.reply("GET", path, None)
    }

    async fn put(&self, path: &str, body: &Value) -> crate::Result<Value> {
        self.reply("PUT", path, Some(body))
    }

    async fn post(&self, path: &str, body: &Value) -> crate::Result<Value> {
        self.reply("POST", path, Some(body))
    }
}

pub const BRIDGE_KEY: &str = "test-key";

fn v2(data: Value) -> Value {
    serde_json::json!({"errors": [], "data": data})
}

/// A small bridge:
///
/// - `/lights/4` "Desk": colour and CT, on, device reachable
/// - `/lights/5` "Shelf": dimmable only, off, device disconnected
/// - `/groups/5` room "Office" with both devices, `/groups/6` zone "Nook"
///   with the shelf light, `/groups/7` zone "Empty" without lights
/// - `/scenes/relax` "Relax" targeting shelf then desk
pub fn hue_bridge() -> FakeTransport {
    use serde_json::json;

    let transport = FakeTransport::new();
    transport
        .on_get(
            "/clip/v2/resource/light",
            v2(json!([
                {
                    "id": "l4",
                    "id_v1": "/lights/4",
                    "type": "light",
                    "owner": {"rid": "d4", "rtype": "device"},
                    "metadata": {"name": "Desk", "archetype": "sultan_bulb"},
                    "on": {"on": true},
                    "dimming": {"brightness": 50.0, "min_dim_level": 0.2},
                    "color_temperature": {
                        "mirek": 300,
                        "mirek_valid": true,
                        "mirek_schema": {"mirek_minimum": 153, "mirek_maximum": 454}
                    },
                    "color": {
                        "xy": {"x": 0.4, "y": 0.4},
                        "gamut_type": "C"
                    },
                    "effects": {
                        "status": "no_effect",
                        "status_values": ["no_effect", "candle"],
                        "effect_values": ["no_effect", "candle"]
                    }
                },
                {
                    "id": "l5",
                    "id_v1": "/lights/5",
                    "type": "light",
                    "owner": {"rid": "d5", "rtype": "device"},
                    "metadata": {"name": "Shelf"},
                    "on": {"on": false},
                    "dimming": {"brightness": 100.0}
                }
            ])),
        )
        .on_get(
            "/clip/v2/resource/device",
            v2(json!([
                {
                    "id": "d4",
                    "metadata": {"name": "Desk"},
                    "services": [
                        {"rid": "l4", "rtype": "light"},
                        {"rid": "z4", "rtype": "zigbee_connectivity"}
                    ]
                },
                {
                    "id": "d5",
                    "metadata": {"name": "Shelf"},
                    "services": [
                        {"rid": "l5", "rtype": "light"},
                        {"rid": "z5", "rtype": "zigbee_connectivity"}
                    ]
                }
            ])),
        )
        .on_get(
            "/clip/v2/resource/zigbee_connectivity",
            v2(json!([
                {"id": "z4", "owner": {"rid": "d4", "rtype": "device"}, "status": "connected"},
                {"id": "z5", "owner": {"rid": "d5", "rtype": "device"}, "status": "disconnected"}
            ])),
        )
        .on_get(
            "/clip/v2/resource/room",
            v2(json!([
                {
                    "id": "r1",
                    "id_v1": "/groups/5",
                    "type": "room",
                    "metadata": {"name": "Office"},
                    "children": [
                        {"rid": "d4", "rtype": "device"},
                        {"rid": "d5", "rtype": "device"}
                    ],
                    "services": [{"rid": "g1", "rtype": "grouped_light"}]
                }
            ])),
        )
        .on_get(
            "/clip/v2/resource/zone",
            v2(json!([
                {
                    "id": "zn1",
                    "id_v1": "/groups/6",
                    "type": "zone",
                    "metadata": {"name": "Nook"},
                    "children": [{"rid": "l5", "rtype": "light"}],
                    "services": [{"rid": "g2", "rtype": "grouped_light"}]
                },
                {
                    "id": "zn2",
                    "id_v1": "/groups/7",
                    "type": "zone",
                    "metadata": {"name": "Empty"},
                    "children": []
                }
            ])),
        )
        .on_get(
            "/clip/v2/resource/grouped_light",
            v2(json!([
                {"id": "g1", "id_v1": "/groups/5", "owner": {"rid": "r1", "rtype": "room"}, "on": {"on": true}},
                {"id": "g2", "id_v1": "/groups/6", "owner": {"rid": "zn1", "rtype": "zone"}, "on": {"on": false}}
            ])),
        )
        .on_get(
            "/clip/v2/resource/scene",
            v2(json!([
                {
                    "id": "s1",
                    "id_v1": "/scenes/relax",
                    "metadata": {"name": "Relax"},
                    "group": {"rid": "r1", "rtype": "room"},
                    "actions": [
                        {"target": {"rid": "l5", "rtype": "light"}, "action": {"on": {"on": true}}},
                        {"target": {"rid": "l4", "rtype": "light"}, "action": {
                            "on": {"on": true},
                            "color_temperature": {"mirek": 366}
                        }}
                    ],
                    "status": {"active": "inactive"}
                }
            ])),
        );
    transport
}
