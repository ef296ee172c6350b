use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The wire protocol a service port declares.
///
/// Registries hand us free-form strings; anything we don't recognize is treated as
/// [`Protocol::Unsupported`], which is also what an undeclared protocol looks like.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(from = "String", into = "String")]
pub enum Protocol {
    Http,
    Http2,
    Grpc,
    GrpcWeb,
    Https,
    Tls,
    Tcp,
    Mongo,
    Mysql,
    Redis,
    Thrift,
    #[default]
    Unsupported,
}

/// The protocol a listener (or one of its filter chains) is built for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ListenerProtocol {
    Http,
    Tcp,
    Thrift,

    /// The protocol is detected at connection time. Listeners that serve more than one protocol
    /// on the same port are also tagged this way.
    Auto,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrafficDirection {
    Inbound,
    Outbound,
}

// === impl Protocol ===

impl Protocol {
    /// Parses a protocol name case-insensitively. Unknown names are `Unsupported`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Self::Http,
            "http2" => Self::Http2,
            "grpc" => Self::Grpc,
            "grpc-web" => Self::GrpcWeb,
            "https" => Self::Https,
            "tls" => Self::Tls,
            "tcp" => Self::Tcp,
            "mongo" => Self::Mongo,
            "mysql" => Self::Mysql,
            "redis" => Self::Redis,
            "thrift" => Self::Thrift,
            _ => Self::Unsupported,
        }
    }

    /// Infers a protocol from a port name such as `http-web` or `grpc`.
    ///
    /// Only the prefix before the first `-` is considered; `grpc-web` is the one protocol whose
    /// name itself contains a dash.
    pub fn from_port_name(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        if name == "grpc-web" || name.starts_with("grpc-web-") {
            return Self::GrpcWeb;
        }
        match name.split_once('-') {
            Some((prefix, _)) => Self::parse(prefix),
            None => Self::parse(&name),
        }
    }

    pub fn is_http(self) -> bool {
        matches!(self, Self::Http | Self::Http2 | Self::Grpc | Self::GrpcWeb)
    }

    /// Indicates whether HTTP traffic on this port must be handled as HTTP/2.
    pub fn is_http2(self) -> bool {
        matches!(self, Self::Http2 | Self::Grpc | Self::GrpcWeb)
    }

    pub fn is_tcp(self) -> bool {
        matches!(
            self,
            Self::Https | Self::Tls | Self::Tcp | Self::Mongo | Self::Mysql | Self::Redis
        )
    }

    pub fn is_thrift(self) -> bool {
        matches!(self, Self::Thrift)
    }

    /// Binary wire protocols whose listeners may not be shared with any other protocol.
    pub fn is_exclusive(self) -> bool {
        matches!(self, Self::Mongo | Self::Mysql | Self::Redis)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Http2 => "HTTP2",
            Self::Grpc => "GRPC",
            Self::GrpcWeb => "GRPC-WEB",
            Self::Https => "HTTPS",
            Self::Tls => "TLS",
            Self::Tcp => "TCP",
            Self::Mongo => "MONGO",
            Self::Mysql => "MYSQL",
            Self::Redis => "REDIS",
            Self::Thrift => "THRIFT",
            Self::Unsupported => "UNSUPPORTED",
        }
    }
}

impl FromStr for Protocol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<String> for Protocol {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<Protocol> for String {
    fn from(p: Protocol) -> Self {
        p.as_str().to_string()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl ListenerProtocol ===

impl ListenerProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Tcp => "tcp",
            Self::Thrift => "thrift",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for ListenerProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl TrafficDirection ===

impl fmt::Display for TrafficDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("inbound"),
            Self::Outbound => f.write_str("outbound"),
        }
    }
}
