use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::{
    common::{VtfsError, VtfsResult},
    engine::FsEngine,
    models::Listing,
    wire::{self, Query},
};

/// One filesystem request, without its token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    List {
        dir_ino: Option<u64>,
        file_ino: Option<u64>,
    },
    Create {
        dir_ino: u64,
        name: String,
        mode: u32,
    },
    Mkdir {
        dir_ino: u64,
        name: String,
        mode: u32,
    },
    Read {
        file_ino: u64,
        offset: u64,
        len: u32,
    },
    Write {
        file_ino: u64,
        offset: u64,
        data: Vec<u8>,
    },
    Delete {
        dir_ino: u64,
        name: String,
    },
    Rmdir {
        dir_ino: u64,
        name: String,
    },
    Link {
        file_ino: u64,
        dir_ino: u64,
        name: String,
    },
    Truncate {
        file_ino: u64,
    },
    Size {
        file_ino: u64,
    },
}

/// Successful result of an operation, before it is put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Listing(Listing),
    Ino(u64),
    Bytes(Vec<u8>),
    Count(u64),
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub token: String,
    #[serde(flatten)]
    pub operation: Operation,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::List { .. } => "list",
            Operation::Create { .. } => "create",
            Operation::Mkdir { .. } => "mkdir",
            Operation::Read { .. } => "read",
            Operation::Write { .. } => "write",
            Operation::Delete { .. } => "delete",
            Operation::Rmdir { .. } => "rmdir",
            Operation::Link { .. } => "link",
            Operation::Truncate { .. } => "truncate",
            Operation::Size { .. } => "size",
        }
    }

    /// Builds the operation `op` from its decoded parameters.
    pub fn from_query(op: &str, q: &Query) -> VtfsResult<Self> {
        Ok(match op {
            "list" => Operation::List {
                dir_ino: q.optional_number("dir_ino")?,
                file_ino: q.optional_number("file_ino")?,
            },
            "create" => Operation::Create {
                dir_ino: q.number("dir_ino")?,
                name: q.string("name")?,
                mode: q.number("mode")?,
            },
            "mkdir" => Operation::Mkdir {
                dir_ino: q.number("dir_ino")?,
                name: q.string("name")?,
                mode: q.number("mode")?,
            },
            "read" => Operation::Read {
                file_ino: q.number("file_ino")?,
                offset: q.number("offset")?,
                len: q.number("len")?,
            },
            "write" => Operation::Write {
                file_ino: q.number("file_ino")?,
                offset: q.number("offset")?,
                data: q.bytes("data")?.to_vec(),
            },
            "delete" => Operation::Delete {
                dir_ino: q.number("dir_ino")?,
                name: q.string("name")?,
            },
            "rmdir" => Operation::Rmdir {
                dir_ino: q.number("dir_ino")?,
                name: q.string("name")?,
            },
            "link" => Operation::Link {
                file_ino: q.number("file_ino")?,
                dir_ino: q.number("dir_ino")?,
                name: q.string("name")?,
            },
            "truncate" => Operation::Truncate {
                file_ino: q.number("file_ino")?,
            },
            "size" => Operation::Size {
                file_ino: q.number("file_ino")?,
            },
            other => return Err(VtfsError::BadRequest(format!("unknown operation {:?}", other))),
        })
    }

    /// Runs the operation against the engine on behalf of `token`.
    pub fn apply(&self, engine: &FsEngine, token: &str) -> VtfsResult<Reply> {
        Ok(match self {
            Operation::List { dir_ino, file_ino } => {
                Reply::Listing(engine.list(token, *dir_ino, *file_ino)?)
            }
            Operation::Create { dir_ino, name, mode } => {
                Reply::Ino(engine.create(token, *dir_ino, name, *mode)?)
            }
            Operation::Mkdir { dir_ino, name, mode } => {
                Reply::Ino(engine.mkdir(token, *dir_ino, name, *mode)?)
            }
            Operation::Read { file_ino, offset, len } => {
                Reply::Bytes(engine.read(token, *file_ino, *offset, *len)?)
            }
            Operation::Write { file_ino, offset, data } => {
                Reply::Count(engine.write(token, *file_ino, *offset, data)?)
            }
            Operation::Delete { dir_ino, name } => {
                engine.delete(token, *dir_ino, name)?;
                Reply::Empty
            }
            Operation::Rmdir { dir_ino, name } => {
                engine.rmdir(token, *dir_ino, name)?;
                Reply::Empty
            }
            Operation::Link { file_ino, dir_ino, name } => {
                engine.link(token, *file_ino, *dir_ino, name)?;
                Reply::Empty
            }
            Operation::Truncate { file_ino } => {
                engine.truncate(token, *file_ino)?;
                Reply::Empty
            }
            Operation::Size { file_ino } => Reply::Count(engine.size(token, *file_ino)?),
        })
    }
}

impl Request {
    pub fn parse(op: &str, query: &str) -> VtfsResult<Self> {
        let q = Query::parse(query)?;
        Ok(Self {
            token: q.string("token")?,
            operation: Operation::from_query(op, &q)?,
        })
    }
}

/// Parses, runs and encodes one request. Never fails: every outcome is an
/// envelope.
pub fn dispatch(engine: &FsEngine, op: &str, query: &str) -> Vec<u8> {
    let result = Request::parse(op, query).and_then(|req| {
        debug!("dispatch {} ({} query bytes)", req.operation.name(), query.len());
        req.operation.apply(engine, &req.token)
    });
    match &result {
        Ok(_) => {}
        Err(e) if e.is_domain() => warn!("{} failed: {}", op, e),
        Err(VtfsError::BadRequest(msg)) => warn!("rejected {} request: {}", op, msg),
        Err(e) => error!("{} failed unexpectedly: {}", op, e),
    }
    wire::encode_response(&result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_operation() {
        let cases = [
            ("list", "token=t&dir_ino=1000"),
            ("create", "token=t&dir_ino=1000&name=a&mode=420"),
            ("mkdir", "token=t&dir_ino=1000&name=d&mode=493"),
            ("read", "token=t&file_ino=1001&offset=0&len=5"),
            ("write", "token=t&file_ino=1001&offset=0&data=hello"),
            ("delete", "token=t&dir_ino=1000&name=a"),
            ("rmdir", "token=t&dir_ino=1000&name=d"),
            ("link", "token=t&file_ino=1001&dir_ino=1000&name=b"),
            ("truncate", "token=t&file_ino=1001"),
            ("size", "token=t&file_ino=1001"),
        ];
        for (op, query) in cases {
            let req = Request::parse(op, query).unwrap();
            assert_eq!(req.token, "t");
            assert_eq!(req.operation.name(), op);
        }
    }

    #[test]
    fn write_data_is_raw_bytes() {
        let req = Request::parse("write", "token=t&file_ino=7&offset=3&data=%00a+b").unwrap();
        assert_eq!(
            req.operation,
            Operation::Write {
                file_ino: 7,
                offset: 3,
                data: vec![0, b'a', b' ', b'b'],
            }
        );
    }

    #[test]
    fn bad_requests() {
        for (op, query) in [
            ("rename", "token=t"),
            ("size", "file_ino=1"),
            ("size", "token=t"),
            ("size", "token=t&file_ino=-1"),
            ("read", "token=t&file_ino=1&offset=0&len=99999999999"),
            ("create", "token=t&dir_ino=1000&name=%f0&mode=420"),
        ] {
            assert!(
                matches!(Request::parse(op, query), Err(VtfsError::BadRequest(_))),
                "{} {}",
                op,
                query
            );
        }
    }

    #[test]
    fn serde_tagging() {
        let req = Request {
            token: "t".into(),
            operation: Operation::Truncate { file_ino: 1001 },
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"token":"t","op":"truncate","file_ino":1001}"#);
        assert_eq!(serde_json::from_str::<Request>(&json).unwrap(), req);
    }
}
