//! Test utilities and fixtures for lexicon, client, and server tests
//!
//! Compiled for this crate's own tests and for dependents that enable the
//! `test-utils` feature.

#![allow(dead_code)]

/// Fixture lexicon documents
pub mod fixtures {
    use crate::registry::LexiconRegistry;
    use crate::validation::{ValidationOptions, Validator};
    use serde_json::{json, Value};

    /// Session bootstrap method
    pub const LOGIN_NSID: &str = "com.atproto.server.createSession";

    /// Session refresh method
    pub const REFRESH_NSID: &str = "com.atproto.server.refreshSession";

    fn object(required: &[&str], properties: Value) -> Value {
        json!({
            "type": "object",
            "required": required,
            "properties": properties,
        })
    }

    fn foo_bar() -> Value {
        object(&["foo"], json!({
            "foo": {"type": "string"},
            "bar": {"type": "number"},
        }))
    }

    fn doc(id: &str, defs: Value) -> Value {
        json!({"lexicon": 1, "id": id, "defs": defs})
    }

    fn main(def: Value) -> Value {
        json!({"main": def})
    }

    /// Methods: queries, procedures, subscriptions, and the session pair
    pub fn methods() -> Vec<Value> {
        vec![
            doc("io.example.procedure", main(json!({
                "type": "procedure",
                "parameters": {
                    "type": "params",
                    "properties": {
                        "x": {"type": "string"},
                        "z": {"type": "boolean"},
                    },
                },
                "input": {"encoding": "application/json", "schema": foo_bar()},
                "output": {"encoding": "application/json", "schema": foo_bar()},
            }))),
            doc("io.example.query", main(json!({
                "type": "query",
                "parameters": {
                    "type": "params",
                    "properties": {
                        "x": {"type": "string"},
                        "z": {"type": "boolean"},
                    },
                },
                "output": {"encoding": "application/json", "schema": foo_bar()},
            }))),
            doc("io.example.params", main(json!({
                "type": "procedure",
                "parameters": {
                    "type": "params",
                    "required": ["bar"],
                    "properties": {
                        "foo": {"type": "string"},
                        "bar": {"type": "integer"},
                        "tags": {"type": "array", "items": {"type": "string"}},
                        "ratio": {"type": "number"},
                        "flag": {"type": "boolean"},
                    },
                },
            }))),
            doc("io.example.noParamsInputOutput", main(json!({"type": "procedure"}))),
            doc("io.exa-mple.dashedName", main(json!({"type": "procedure"}))),
            doc("io.example.encodings", main(json!({
                "type": "procedure",
                "input": {"encoding": "application/octet-stream"},
                "output": {"encoding": "application/octet-stream"},
            }))),
            doc("io.example.subscribe", main(json!({
                "type": "subscription",
                "parameters": {
                    "type": "params",
                    "properties": {
                        "start": {"type": "integer"},
                        "end": {"type": "integer"},
                    },
                },
                "message": {
                    "schema": object(&["num"], json!({"num": {"type": "integer"}})),
                },
            }))),
            doc("io.example.subscribeRepos", json!({
                "main": {
                    "type": "subscription",
                    "message": {
                        "schema": {"type": "union", "refs": ["#commit", "#identity"]},
                    },
                },
                "commit": object(&["seq", "repo"], json!({
                    "seq": {"type": "integer"},
                    "repo": {"type": "string", "format": "did"},
                })),
                "identity": object(&["seq", "did"], json!({
                    "seq": {"type": "integer"},
                    "did": {"type": "string", "format": "did"},
                })),
            })),
            doc("io.example.echo", main(json!({
                "type": "procedure",
                "input": {
                    "encoding": "application/json",
                    "schema": object(&["text"], json!({"text": {"type": "string"}})),
                },
                "output": {
                    "encoding": "application/json",
                    "schema": object(&["text"], json!({"text": {"type": "string"}})),
                },
            }))),
            doc(LOGIN_NSID, main(json!({
                "type": "procedure",
                "input": {
                    "encoding": "application/json",
                    "schema": object(&["identifier", "password"], json!({
                        "identifier": {"type": "string"},
                        "password": {"type": "string"},
                    })),
                },
                "output": {"encoding": "application/json", "schema": session()},
            }))),
            doc(REFRESH_NSID, main(json!({
                "type": "procedure",
                "output": {"encoding": "application/json", "schema": session()},
            }))),
            doc("com.atproto.identity.resolveHandle", main(json!({
                "type": "query",
                "parameters": {
                    "type": "params",
                    "required": ["handle"],
                    "properties": {"handle": {"type": "string", "format": "handle"}},
                },
                "output": {
                    "encoding": "application/json",
                    "schema": object(&["did"], json!({"did": {"type": "string", "format": "did"}})),
                },
            }))),
        ]
    }

    fn session() -> Value {
        object(&["accessJwt", "refreshJwt", "handle", "did"], json!({
            "accessJwt": {"type": "string"},
            "refreshJwt": {"type": "string"},
            "handle": {"type": "string", "format": "handle"},
            "did": {"type": "string", "format": "did"},
        }))
    }

    /// Records and shared object types
    pub fn records() -> Vec<Value> {
        vec![
            doc("io.example.record", json!({
                "main": {
                    "type": "record",
                    "key": "tid",
                    "record": object(&["baz"], json!({
                        "baz": {"type": "integer"},
                        "biff": {"type": "ref", "ref": "#biff"},
                    })),
                },
                "biff": object(&[], json!({"baj": {"type": "string"}})),
            })),
            doc("io.example.kitchenSink", json!({
                "main": {
                    "type": "record",
                    "key": "tid",
                    "record": object(
                        &["array", "boolean", "integer", "string", "datetime"],
                        json!({
                            "array": {"type": "array", "items": {"type": "string"}, "maxLength": 3},
                            "boolean": {"type": "boolean"},
                            "integer": {"type": "integer", "minimum": 0, "maximum": 10},
                            "string": {"type": "string", "minLength": 1, "maxLength": 8},
                            "datetime": {"type": "string", "format": "datetime"},
                            "object": {"type": "ref", "ref": "#object"},
                            "bytes": {"type": "bytes", "maxLength": 4},
                            "link": {"type": "cid-link"},
                            "null": {"type": "null"},
                        }),
                    ),
                },
                "object": object(&["subobject"], json!({
                    "array": {"type": "array", "items": {"type": "string"}},
                    "boolean": {"type": "boolean"},
                    "integer": {"type": "integer"},
                    "string": {"type": "string"},
                    "subobject": {"type": "ref", "ref": "#subobject"},
                })),
                "subobject": object(&["boolean"], json!({"boolean": {"type": "boolean"}})),
            })),
            doc("io.example.stringLength", main(json!({
                "type": "record",
                "record": object(&[], json!({
                    "string": {"type": "string", "maxGraphemes": 10, "maxLength": 40},
                })),
            }))),
            doc("io.example.outer", main(json!({
                "type": "record",
                "record": object(&[], json!({
                    "str": {"type": "ref", "ref": "io.example.stringLength"},
                })),
            }))),
            doc("io.example.graphemes", main(json!({
                "type": "record",
                "record": object(&[], json!({
                    "string": {"type": "string", "minGraphemes": 2, "maxGraphemes": 3},
                })),
            }))),
            doc("io.example.token", main(json!({"type": "token"}))),
            doc("io.example.union", json!({
                "main": {
                    "type": "record",
                    "record": object(&[], json!({
                        "open": {
                            "type": "union",
                            "refs": ["io.example.kitchenSink#subobject", "io.example.token"],
                        },
                        "closed": {
                            "type": "union",
                            "refs": ["io.example.kitchenSink#subobject", "#local"],
                            "closed": true,
                        },
                    })),
                },
                "local": object(&["n"], json!({"n": {"type": "integer"}})),
            })),
            doc("io.example.unionArray", main(json!({
                "type": "record",
                "record": object(&[], json!({
                    "items": {
                        "type": "array",
                        "items": {"type": "union", "refs": ["io.example.kitchenSink#subobject"]},
                    },
                })),
            }))),
            doc("io.example.unknown", main(json!({
                "type": "record",
                "record": object(&[], json!({"unknown": {"type": "unknown"}})),
            }))),
            doc("io.example.refArray", main(json!({
                "type": "record",
                "record": object(&[], json!({
                    "foo": {"type": "array", "items": {"type": "ref", "ref": "io.example.record"}},
                })),
            }))),
            doc("io.example.objectArray", main(json!({
                "type": "record",
                "record": object(&[], json!({
                    "foo": {
                        "type": "array",
                        "items": object(&["bar"], json!({
                            "bar": {"type": "integer"},
                            "baj": {"type": "string"},
                        })),
                    },
                })),
            }))),
            doc("io.example.blob", main(json!({
                "type": "record",
                "record": object(&[], json!({
                    "image": {"type": "blob", "accept": ["image/*"], "maxSize": 1000},
                    "any": {"type": "blob"},
                })),
            }))),
            doc("io.example.nullable", main(json!({
                "type": "record",
                "record": {
                    "type": "object",
                    "nullable": ["maybe"],
                    "properties": {
                        "maybe": {"type": "string"},
                        "never": {"type": "string"},
                    },
                },
            }))),
            doc("io.example.constraints", main(json!({
                "type": "record",
                "record": object(&[], json!({
                    "constant": {"type": "string", "const": "fixed"},
                    "choice": {"type": "integer", "enum": [1, 2, 3]},
                    "format": {"type": "string", "format": "color"},
                    "did": {"type": "string", "format": "did"},
                })),
            }))),
            doc("io.example.cycle", json!({
                "main": {"type": "ref", "ref": "#loop"},
                "loop": {"type": "ref", "ref": "io.example.cycle"},
            })),
        ]
    }

    /// All fixture documents
    pub fn lexicons() -> Vec<Value> {
        let mut all = methods();
        all.extend(records());
        all
    }

    /// Registry over [`lexicons`]
    pub fn registry() -> LexiconRegistry {
        match LexiconRegistry::from_values(lexicons()) {
            Ok(registry) => registry,
            Err(e) => panic!("fixture lexicons failed to load: {}", e),
        }
    }

    /// Strict, non-truncating validator over [`lexicons`]
    pub fn validator() -> Validator {
        Validator::new(registry(), ValidationOptions::default())
    }

    /// Validator that truncates over-long strings
    pub fn truncating_validator() -> Validator {
        Validator::new(registry(), ValidationOptions::default().with_truncate(true))
    }
}
