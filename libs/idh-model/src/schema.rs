//! Connection schema parsing
//!
//! Supported forms:
//! - UA:  `opc.tcp://<host>[:<port>][/<path>]` (port defaults to 4840)
//! - DA:  `opc.da://[<host>]/<ProgID-or-CLSID>[?ds_device=0|1]`
//!   (`ds_device=1` selects ProgID addressing, `ds_device=0` CLSID)
//! - CSV: `csv://<path>`, `file://<path>` or a bare file path

use crate::source::SourceType;
use errors::{HubError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

pub const DEFAULT_UA_PORT: u16 = 4840;

const UA_PATTERN: &str = r"^opc\.tcp://(\[[0-9A-Fa-f:.]+\]|[^/:\s\[\]]+)(?::(\d{1,5}))?(/\S*)?$";
const DA_PATTERN: &str = r"^opc\.da://([^/?\s]*)/([^?\s/]+)(?:\?ds_device=([01]))?$";
const CLSID_PATTERN: &str =
    r"^\{?[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}\}?$";

static UA_RE: OnceLock<Option<Regex>> = OnceLock::new();
static DA_RE: OnceLock<Option<Regex>> = OnceLock::new();
static CLSID_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Result<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .ok_or_else(|| HubError::syntax(format!("schema pattern failed to compile: {pattern}")))
}

/// How a DA server is selected on its host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DaServer {
    ProgId(String),
    Clsid(String),
}

impl DaServer {
    pub fn ds_device(&self) -> u8 {
        match self {
            Self::ProgId(_) => 1,
            Self::Clsid(_) => 0,
        }
    }

    pub fn selector(&self) -> &str {
        match self {
            Self::ProgId(s) | Self::Clsid(s) => s,
        }
    }
}

/// Parsed connection schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceAddress {
    Ua {
        host: String,
        port: u16,
        path: Option<String>,
    },
    Da {
        host: String,
        server: DaServer,
    },
    Csv {
        path: PathBuf,
    },
}

impl SourceAddress {
    /// Validate `schema` for `source_type`; malformed input fails with `Syntax`
    pub fn parse(source_type: SourceType, schema: &str) -> Result<Self> {
        let schema = schema.trim();
        if schema.is_empty() {
            return Err(HubError::syntax("empty source schema"));
        }
        match source_type {
            SourceType::Ua => Self::parse_ua(schema),
            SourceType::Da => Self::parse_da(schema),
            SourceType::Csv => Self::parse_csv(schema),
        }
    }

    fn parse_ua(schema: &str) -> Result<Self> {
        let caps = compiled(&UA_RE, UA_PATTERN)?
            .captures(schema)
            .ok_or_else(|| HubError::syntax(format!("invalid UA schema '{schema}'")))?;

        let host = caps[1].to_string();
        let port = match caps.get(2) {
            Some(p) => match p.as_str().parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => {
                    return Err(HubError::syntax(format!(
                        "invalid UA port '{}' in '{schema}'",
                        p.as_str()
                    )))
                },
            },
            None => DEFAULT_UA_PORT,
        };
        let path = caps
            .get(3)
            .map(|m| m.as_str())
            .filter(|p| *p != "/")
            .map(str::to_string);

        Ok(Self::Ua { host, port, path })
    }

    fn parse_da(schema: &str) -> Result<Self> {
        let caps = compiled(&DA_RE, DA_PATTERN)?.captures(schema).ok_or_else(|| {
            HubError::syntax(format!(
                "invalid DA schema '{schema}', expected opc.da://<host>/<ProgID-or-CLSID>"
            ))
        })?;

        let host = match &caps[1] {
            "" => "localhost".to_string(),
            h => h.to_string(),
        };
        let selector = caps[2].to_string();
        let clsid_shaped = compiled(&CLSID_RE, CLSID_PATTERN)?.is_match(&selector);

        let server = match caps.get(3).map(|m| m.as_str()) {
            Some("1") => DaServer::ProgId(selector),
            Some(_) if clsid_shaped => DaServer::Clsid(selector),
            Some(_) => {
                return Err(HubError::syntax(format!(
                    "ds_device=0 requires a CLSID selector, got '{selector}'"
                )))
            },
            None if clsid_shaped => DaServer::Clsid(selector),
            None => DaServer::ProgId(selector),
        };

        Ok(Self::Da { host, server })
    }

    fn parse_csv(schema: &str) -> Result<Self> {
        let path = schema
            .strip_prefix("csv://")
            .or_else(|| schema.strip_prefix("file://"))
            .unwrap_or(schema);
        if path.is_empty() || path.contains("://") {
            return Err(HubError::syntax(format!("invalid CSV schema '{schema}'")));
        }
        Ok(Self::Csv {
            path: PathBuf::from(path),
        })
    }

    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Ua { .. } => SourceType::Ua,
            Self::Da { .. } => SourceType::Da,
            Self::Csv { .. } => SourceType::Csv,
        }
    }
}

impl fmt::Display for SourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ua { host, port, path } => {
                write!(f, "opc.tcp://{host}:{port}{}", path.as_deref().unwrap_or(""))
            },
            Self::Da { host, server } => write!(
                f,
                "opc.da://{host}/{}?ds_device={}",
                server.selector(),
                server.ds_device()
            ),
            Self::Csv { path } => write!(f, "csv://{}", path.display()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use errors::ErrorCode;

    #[test]
    fn test_ua_schemas() {
        assert_eq!(
            SourceAddress::parse(SourceType::Ua, "opc.tcp://DESKTOP-S7QB5IR:48010").unwrap(),
            SourceAddress::Ua {
                host: "DESKTOP-S7QB5IR".into(),
                port: 48010,
                path: None
            }
        );
        assert_eq!(
            SourceAddress::parse(SourceType::Ua, "opc.tcp://10.0.0.5:46011/").unwrap(),
            SourceAddress::Ua {
                host: "10.0.0.5".into(),
                port: 46011,
                path: None
            }
        );
        match SourceAddress::parse(SourceType::Ua, "opc.tcp://plc/UA/Server").unwrap() {
            SourceAddress::Ua { port, path, .. } => {
                assert_eq!(port, DEFAULT_UA_PORT);
                assert_eq!(path.as_deref(), Some("/UA/Server"));
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ua_rejects_malformed() {
        for bad in [
            "http://host:4840",
            "opc.tcp://",
            "opc.tcp://host:0",
            "opc.tcp://host:70000",
            "opc.tcp://host:abc",
        ] {
            let err = SourceAddress::parse(SourceType::Ua, bad).unwrap_err();
            assert_eq!(err.code(), ErrorCode::Syntax, "{bad}");
        }
    }

    #[test]
    fn test_da_selectors() {
        assert_eq!(
            SourceAddress::parse(SourceType::Da, "opc.da://localhost/TaiJi.OPC.Sim").unwrap(),
            SourceAddress::Da {
                host: "localhost".into(),
                server: DaServer::ProgId("TaiJi.OPC.Sim".into())
            }
        );

        let clsid = "{F8582CF2-88FB-11D0-B850-00C0F0104305}";
        match SourceAddress::parse(SourceType::Da, &format!("opc.da://srv/{clsid}?ds_device=0"))
            .unwrap()
        {
            SourceAddress::Da { host, server } => {
                assert_eq!(host, "srv");
                assert_eq!(server, DaServer::Clsid(clsid.into()));
                assert_eq!(server.ds_device(), 0);
            },
            other => panic!("unexpected {other:?}"),
        }

        match SourceAddress::parse(SourceType::Da, "opc.da:///Matrikon.OPC.Simulation?ds_device=1")
            .unwrap()
        {
            SourceAddress::Da { host, server } => {
                assert_eq!(host, "localhost");
                assert_eq!(server.selector(), "Matrikon.OPC.Simulation");
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_da_requires_selector() {
        for bad in [
            "opc.da://localhost",
            "opc.da://localhost/",
            "opc.da://localhost/Prog?ds_device=2",
            "opc.da://localhost/NotAClsid?ds_device=0",
            "opc.tcp://localhost:4840",
        ] {
            assert!(SourceAddress::parse(SourceType::Da, bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_csv_schemas() {
        for schema in ["csv:///tmp/a.csv", "file:///tmp/a.csv", "/tmp/a.csv"] {
            assert_eq!(
                SourceAddress::parse(SourceType::Csv, schema).unwrap(),
                SourceAddress::Csv {
                    path: PathBuf::from("/tmp/a.csv")
                }
            );
        }
        assert!(SourceAddress::parse(SourceType::Csv, "").is_err());
        assert!(SourceAddress::parse(SourceType::Csv, "csv://").is_err());
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        let addr = SourceAddress::parse(SourceType::Ua, "opc.tcp://h:1234/x").unwrap();
        assert_eq!(
            SourceAddress::parse(SourceType::Ua, &addr.to_string()).unwrap(),
            addr
        );
        let addr = SourceAddress::parse(SourceType::Da, "opc.da://h/Prog.Id").unwrap();
        assert_eq!(
            SourceAddress::parse(SourceType::Da, &addr.to_string()).unwrap(),
            addr
        );
    }
}
