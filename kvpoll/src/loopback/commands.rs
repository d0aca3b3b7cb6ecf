//! Command execution against the in-memory store.
//!
//! Replies and error strings follow the usual key-value server conventions
//! so callbacks see the same shapes a real server would send.

use std::collections::HashMap;
use std::time::Duration;

use minstant::Instant;

use crate::loopback::server::{ConnState, DATABASES, Entry, State};
use crate::network::Command;
use crate::reply::WireReply;

pub(crate) fn execute(state: &mut State, conn: &mut ConnState, command: &Command) -> WireReply {
    let name = command.name();
    let args = command.params();

    if state.password.is_some() && !conn.authenticated && !matches!(name.as_str(), "AUTH" | "PING")
    {
        return error("NOAUTH Authentication required.");
    }

    let now = Instant::now();
    match (name.as_str(), args) {
        ("PING", []) => WireReply::SimpleString("PONG".to_string()),
        ("PING", [message]) | ("ECHO", [message]) => WireReply::BulkString(message.clone()),
        ("AUTH", [password]) => auth(state, conn, password),
        ("SELECT", [db]) => select(conn, db),
        ("GET", [key]) => match live(db(state, conn), key, now) {
            Some(entry) => WireReply::BulkString(entry.value.clone()),
            None => WireReply::Null,
        },
        ("SET", [key, value]) => {
            db(state, conn).insert(key.clone(), Entry::new(value.clone()));
            ok()
        }
        ("SETEX", [key, seconds, value]) => set_ex(db(state, conn), key, seconds, value, now),
        ("DEL", keys) if !keys.is_empty() => {
            let db = db(state, conn);
            let removed = keys
                .iter()
                .filter(|key| db.remove(key.as_str()).is_some_and(|entry| entry.is_live(now)))
                .count();
            integer(removed)
        }
        ("EXISTS", keys) if !keys.is_empty() => {
            let db = db(state, conn);
            let found = keys
                .iter()
                .filter(|key| live(db, key, now).is_some())
                .count();
            integer(found)
        }
        ("TTL", [key]) => ttl(db(state, conn), key, now),
        ("INCR", [key]) => incr(db(state, conn), key, now),
        ("MGET", keys) if !keys.is_empty() => {
            let db = db(state, conn);
            WireReply::Array(
                keys.iter()
                    .map(|key| match live(db, key, now) {
                        Some(entry) => WireReply::BulkString(entry.value.clone()),
                        None => WireReply::Null,
                    })
                    .collect(),
            )
        }
        ("PUBLISH", [channel, payload]) => integer(state.publish(channel, payload)),
        (
            "PING" | "ECHO" | "AUTH" | "SELECT" | "GET" | "SET" | "SETEX" | "DEL" | "EXISTS"
            | "TTL" | "INCR" | "MGET" | "PUBLISH",
            _,
        ) => error(format!(
            "ERR wrong number of arguments for '{}' command",
            name.to_ascii_lowercase()
        )),
        _ => error(format!("ERR unknown command '{}'", command.args()[0])),
    }
}

fn db<'a>(state: &'a mut State, conn: &ConnState) -> &'a mut HashMap<String, Entry> {
    &mut state.databases[conn.db]
}

/// Looks up `key`, evicting it first if it has expired.
fn live<'a>(db: &'a mut HashMap<String, Entry>, key: &str, now: Instant) -> Option<&'a mut Entry> {
    if db.get(key).is_some_and(|entry| !entry.is_live(now)) {
        db.remove(key);
    }
    db.get_mut(key)
}

fn auth(state: &State, conn: &mut ConnState, password: &str) -> WireReply {
    match &state.password {
        None => error(
            "ERR AUTH <password> called without any password configured for the default user. \
             Are you sure your configuration is correct?",
        ),
        Some(expected) if expected == password => {
            conn.authenticated = true;
            ok()
        }
        Some(_) => error("WRONGPASS invalid username-password pair or user is disabled."),
    }
}

fn select(conn: &mut ConnState, db: &str) -> WireReply {
    match db.parse::<usize>() {
        Ok(index) if index < DATABASES => {
            conn.db = index;
            ok()
        }
        Ok(_) => error("ERR DB index is out of range"),
        Err(_) => not_an_integer(),
    }
}

fn set_ex(
    db: &mut HashMap<String, Entry>,
    key: &str,
    seconds: &str,
    value: &str,
    now: Instant,
) -> WireReply {
    let seconds = match seconds.parse::<i64>() {
        Ok(seconds) if seconds > 0 => seconds.unsigned_abs(),
        Ok(_) => return error("ERR invalid expire time in 'setex' command"),
        Err(_) => return not_an_integer(),
    };
    db.insert(
        key.to_string(),
        Entry {
            value: value.to_string(),
            expires_at: Some(now + Duration::from_secs(seconds)),
        },
    );
    ok()
}

fn ttl(db: &mut HashMap<String, Entry>, key: &str, now: Instant) -> WireReply {
    match live(db, key, now) {
        None => WireReply::Integer(-2),
        Some(Entry {
            expires_at: None, ..
        }) => WireReply::Integer(-1),
        Some(Entry {
            expires_at: Some(at),
            ..
        }) => {
            let remaining = at.checked_duration_since(now).unwrap_or_default().as_millis();
            WireReply::Integer(i64::try_from(remaining.div_ceil(1000)).unwrap_or(i64::MAX))
        }
    }
}

fn incr(db: &mut HashMap<String, Entry>, key: &str, now: Instant) -> WireReply {
    if live(db, key, now).is_none() {
        db.insert(key.to_string(), Entry::new("0".to_string()));
    }
    let Some(entry) = db.get_mut(key) else {
        return not_an_integer();
    };
    let Some(next) = entry
        .value
        .parse::<i64>()
        .ok()
        .and_then(|n| n.checked_add(1))
    else {
        return not_an_integer();
    };
    entry.value = next.to_string();
    WireReply::Integer(next)
}

fn ok() -> WireReply {
    WireReply::SimpleString("OK".to_string())
}

fn integer(n: usize) -> WireReply {
    WireReply::Integer(i64::try_from(n).unwrap_or(i64::MAX))
}

fn error(message: impl Into<String>) -> WireReply {
    WireReply::Error(message.into())
}

fn not_an_integer() -> WireReply {
    error("ERR value is not an integer or out of range")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(state: &mut State, conn: &mut ConnState, line: &str) -> WireReply {
        let mut words = line.split_whitespace();
        let mut command = Command::new(words.next().unwrap());
        for word in words {
            command = command.arg(word);
        }
        execute(state, conn, &command)
    }

    fn bulk(s: &str) -> WireReply {
        WireReply::BulkString(s.to_string())
    }

    #[test]
    fn test_string_commands() {
        let mut state = State::new(None);
        let mut conn = ConnState::default();

        assert_eq!(run(&mut state, &mut conn, "GET k"), WireReply::Null);
        assert_eq!(run(&mut state, &mut conn, "SET k v"), ok());
        assert_eq!(run(&mut state, &mut conn, "get k"), bulk("v"));
        assert_eq!(run(&mut state, &mut conn, "EXISTS k missing k"), WireReply::Integer(2));
        assert_eq!(
            run(&mut state, &mut conn, "MGET k missing"),
            WireReply::Array(vec![bulk("v"), WireReply::Null])
        );
        assert_eq!(run(&mut state, &mut conn, "DEL k missing"), WireReply::Integer(1));
        assert_eq!(run(&mut state, &mut conn, "EXISTS k"), WireReply::Integer(0));
    }

    #[test]
    fn test_incr_and_ttl() {
        let mut state = State::new(None);
        let mut conn = ConnState::default();

        assert_eq!(run(&mut state, &mut conn, "INCR n"), WireReply::Integer(1));
        assert_eq!(run(&mut state, &mut conn, "INCR n"), WireReply::Integer(2));
        assert_eq!(run(&mut state, &mut conn, "TTL n"), WireReply::Integer(-1));
        assert_eq!(run(&mut state, &mut conn, "TTL missing"), WireReply::Integer(-2));

        assert_eq!(run(&mut state, &mut conn, "SETEX s 100 v"), ok());
        assert_eq!(run(&mut state, &mut conn, "TTL s"), WireReply::Integer(100));
        assert_eq!(run(&mut state, &mut conn, "SET s text"), ok());
        assert!(matches!(run(&mut state, &mut conn, "INCR s"), WireReply::Error(_)));
        assert!(matches!(
            run(&mut state, &mut conn, "SETEX s 0 v"),
            WireReply::Error(e) if e.contains("invalid expire time")
        ));
    }

    #[test]
    fn test_expired_key_is_gone() {
        let mut state = State::new(None);
        let mut conn = ConnState::default();
        state.databases[0].insert(
            "old".to_string(),
            Entry {
                value: "v".to_string(),
                expires_at: Some(Instant::now()),
            },
        );
        assert_eq!(run(&mut state, &mut conn, "GET old"), WireReply::Null);
        assert!(state.databases[0].is_empty());
    }

    #[test]
    fn test_select_isolates_databases() {
        let mut state = State::new(None);
        let mut conn = ConnState::default();

        run(&mut state, &mut conn, "SET k zero");
        assert_eq!(run(&mut state, &mut conn, "SELECT 3"), ok());
        assert_eq!(run(&mut state, &mut conn, "GET k"), WireReply::Null);
        assert_eq!(
            run(&mut state, &mut conn, "SELECT 16"),
            WireReply::Error("ERR DB index is out of range".to_string())
        );
        assert_eq!(conn.db, 3);
    }

    #[test]
    fn test_auth_gate() {
        let mut state = State::new(Some("secret".to_string()));
        let mut conn = ConnState::default();

        assert_eq!(
            run(&mut state, &mut conn, "GET k"),
            WireReply::Error("NOAUTH Authentication required.".to_string())
        );
        assert_eq!(
            run(&mut state, &mut conn, "PING"),
            WireReply::SimpleString("PONG".to_string())
        );
        assert!(matches!(
            run(&mut state, &mut conn, "AUTH wrong"),
            WireReply::Error(e) if e.starts_with("WRONGPASS")
        ));
        assert_eq!(run(&mut state, &mut conn, "AUTH secret"), ok());
        assert_eq!(run(&mut state, &mut conn, "GET k"), WireReply::Null);
    }

    #[test]
    fn test_protocol_errors() {
        let mut state = State::new(None);
        let mut conn = ConnState::default();

        assert_eq!(
            run(&mut state, &mut conn, "GET"),
            WireReply::Error("ERR wrong number of arguments for 'get' command".to_string())
        );
        assert_eq!(
            run(&mut state, &mut conn, "FLY away"),
            WireReply::Error("ERR unknown command 'FLY'".to_string())
        );
        assert_eq!(
            run(&mut state, &mut conn, "PUBLISH ch hello"),
            WireReply::Integer(0)
        );
    }
}
