//! Client statement parser.
//!
//! Statements are `;`-terminated, keywords are case-insensitive,
//! operands are alphanumeric-and-`/` tokens:
//!
//! ```text
//! PUT /users/1 ada;
//! GET /users/1;
//! DELETE /users/1;
//! BEGIN; PUT /users/1 ada; GET /users/2; END;
//! EXIT;
//! ```

use murmur_common::error::{MurmurError, MurmurResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Put { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    Begin,
    End,
    Exit,
}

fn operand(token: &str) -> MurmurResult<String> {
    let valid = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '/');
    if valid {
        Ok(token.to_string())
    } else {
        Err(MurmurError::InvalidRequest(format!(
            "operand {token:?} may only contain alphanumerics and '/'"
        )))
    }
}

/// Parse one statement (without its trailing `;`).
pub fn parse(input: &str) -> MurmurResult<Statement> {
    let mut tokens = input.split_whitespace();
    let keyword = tokens
        .next()
        .ok_or_else(|| MurmurError::InvalidRequest("empty statement".into()))?;

    let statement = match keyword.to_ascii_uppercase().as_str() {
        "PUT" => {
            let key = tokens
                .next()
                .ok_or_else(|| MurmurError::InvalidRequest("PUT requires a key".into()))?;
            let value = tokens
                .next()
                .ok_or_else(|| MurmurError::InvalidRequest("PUT requires a value".into()))?;
            Statement::Put {
                key: operand(key)?,
                value: operand(value)?,
            }
        }
        "GET" => {
            let key = tokens
                .next()
                .ok_or_else(|| MurmurError::InvalidRequest("GET requires a key".into()))?;
            Statement::Get {
                key: operand(key)?,
            }
        }
        "DELETE" => {
            let key = tokens
                .next()
                .ok_or_else(|| MurmurError::InvalidRequest("DELETE requires a key".into()))?;
            Statement::Delete {
                key: operand(key)?,
            }
        }
        "BEGIN" => Statement::Begin,
        "END" => Statement::End,
        "EXIT" => Statement::Exit,
        other => {
            return Err(MurmurError::InvalidRequest(format!(
                "unknown keyword {other:?}"
            )));
        }
    };

    if tokens.next().is_some() {
        return Err(MurmurError::InvalidRequest(
            "trailing tokens after statement".into(),
        ));
    }
    Ok(statement)
}
