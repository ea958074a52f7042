//! Route handlers.

use std::sync::Arc;

use http::StatusCode;

use crate::app::{App, session};
use crate::auth::{FLASH_KEY, USER_ID_KEY};
use crate::forms::{EMAIL_RX, Form, GENERIC};
use crate::models::ModelError;
use crate::request::Request;
use crate::response::Response;
use crate::templates::TemplateData;

const EXPIRY_DAYS: [&str; 3] = ["365", "7", "1"];

pub async fn home(app: Arc<App>, req: Request) -> Response {
    match app.snippets.latest().await {
        Ok(snippets) => app.render(&req, "home.page.tmpl", TemplateData::with_snippets(snippets)),
        Err(e) => app.server_error(&e),
    }
}

pub async fn show_snippet(app: Arc<App>, req: Request) -> Response {
    let id = match req.param("id").and_then(|s| s.parse::<i64>().ok()) {
        Some(id) if id >= 1 => id,
        _ => return app.not_found(),
    };

    match app.snippets.get(id).await {
        Ok(snippet) => app.render(&req, "show.page.tmpl", TemplateData::with_snippet(snippet)),
        Err(ModelError::NoRecord) => app.not_found(),
        Err(e) => app.server_error(&e),
    }
}

pub async fn create_snippet_form(app: Arc<App>, req: Request) -> Response {
    app.render(&req, "create.page.tmpl", TemplateData::with_form(Form::new()))
}

pub async fn create_snippet(app: Arc<App>, req: Request) -> Response {
    let Ok(mut form) = Form::parse(req.body()) else {
        return app.client_error(StatusCode::BAD_REQUEST);
    };

    form.required(&["title", "content", "expires"]);
    form.max_length("title", 100);
    form.permitted_values("expires", &EXPIRY_DAYS);
    if !form.valid() {
        return app.render(&req, "create.page.tmpl", TemplateData::with_form(form));
    }

    // `permitted_values` guarantees this parses.
    let days = form.get("expires").parse::<i64>().unwrap_or(1);
    match app.snippets.insert(form.get("title"), form.get("content"), days).await {
        Ok(id) => {
            session(&req).put(FLASH_KEY, "Snippet successfully created!");
            Response::redirect(&format!("/snippet/{id}"))
        }
        Err(e) => app.server_error(&e),
    }
}

pub async fn signup_user_form(app: Arc<App>, req: Request) -> Response {
    app.render(&req, "signup.page.tmpl", TemplateData::with_form(Form::new()))
}

pub async fn signup_user(app: Arc<App>, req: Request) -> Response {
    let Ok(mut form) = Form::parse(req.body()) else {
        return app.client_error(StatusCode::BAD_REQUEST);
    };

    form.required(&["name", "email", "password"]);
    form.max_length("email", 255);
    form.matches_pattern("email", &EMAIL_RX);
    form.min_length("password", 10);
    if !form.valid() {
        return app.render(&req, "signup.page.tmpl", TemplateData::with_form(form));
    }

    match app.users.insert(form.get("name"), form.get("email"), form.get("password")).await {
        Ok(()) => {
            session(&req).put(FLASH_KEY, "Your signup was successful. Please log in.");
            Response::redirect("/user/login")
        }
        Err(ModelError::DuplicateEmail) => {
            form.add_error("email", "Address is already in use");
            app.render(&req, "signup.page.tmpl", TemplateData::with_form(form))
        }
        Err(e) => app.server_error(&e),
    }
}

pub async fn login_user_form(app: Arc<App>, req: Request) -> Response {
    app.render(&req, "login.page.tmpl", TemplateData::with_form(Form::new()))
}

pub async fn login_user(app: Arc<App>, req: Request) -> Response {
    let Ok(mut form) = Form::parse(req.body()) else {
        return app.client_error(StatusCode::BAD_REQUEST);
    };

    match app.users.authenticate(form.get("email"), form.get("password")).await {
        Ok(id) => {
            session(&req).put(USER_ID_KEY, id);
            Response::redirect("/snippet/create")
        }
        Err(ModelError::InvalidCredentials) => {
            form.add_error(GENERIC, "Email or Password is incorrect");
            app.render(&req, "login.page.tmpl", TemplateData::with_form(form))
        }
        Err(e) => app.server_error(&e),
    }
}

pub async fn logout_user(_app: Arc<App>, req: Request) -> Response {
    let session = session(&req);
    session.remove(USER_ID_KEY);
    session.put(FLASH_KEY, "You've been logged out successfully!");
    Response::redirect("/")
}

/// Liveness probe. No session, no authentication, no dependencies.
pub async fn ping(_req: Request) -> Response {
    Response::text("OK")
}
