//! Response bodies shaped like the hosted provider's, for wiremock tests.

use serde_json::{json, Value};

pub fn user_json(id: &str, email: &str) -> Value {
    json!({
        "id": id,
        "aud": "authenticated",
        "role": "authenticated",
        "email": email,
        "created_at": "2024-01-10T08:30:00Z"
    })
}

pub fn token_json(id: &str, email: &str, expires_in: i64) -> Value {
    json!({
        "access_token": format!("access-{}", id),
        "token_type": "bearer",
        "expires_in": expires_in,
        "refresh_token": format!("refresh-{}", id),
        "user": user_json(id, email)
    })
}

pub fn auth_error_json(error_code: &str, msg: &str) -> Value {
    json!({
        "code": 400,
        "error_code": error_code,
        "msg": msg
    })
}

pub fn rest_error_json(code: &str, message: &str) -> Value {
    json!({
        "code": code,
        "details": null,
        "hint": null,
        "message": message
    })
}

pub fn profile_json(id: &str, email: &str, full_name: &str, is_master: bool) -> Value {
    json!({
        "id": id,
        "created_at": "2024-01-10T08:30:00.123456+00:00",
        "email": email,
        "full_name": full_name,
        "is_master": is_master
    })
}

pub fn work_hour_json(id: &str, user_id: &str, date: &str, hours: f64) -> Value {
    json!({
        "id": id,
        "created_at": "2024-01-10T09:00:00+00:00",
        "user_id": user_id,
        "date": date,
        "hours": hours,
        "description": null
    })
}
