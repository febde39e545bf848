//! The login and error pages are opaque assets with fixed input shapes,
//! parsed once at startup and rendered per request.

use shared::error::CommonError;
use tera::{Context, Tera};

const LOGIN_TEMPLATE: &str = include_str!("../../templates/login.html");
const ERROR_TEMPLATE: &str = include_str!("../../templates/error.html");

pub struct Templates {
    tera: Tera,
}

impl Templates {
    pub fn load() -> Result<Self, CommonError> {
        let mut tera = Tera::default();

        // The .html names keep tera's autoescaping on for interpolations.
        tera.add_raw_template("login.html", LOGIN_TEMPLATE)
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to parse login template: {e}")))?;

        tera.add_raw_template("error.html", ERROR_TEMPLATE)
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to parse error template: {e}")))?;

        Ok(Self { tera })
    }

    /// Render the login form, preserving the original authorization query so
    /// it can be replayed through `/login`.
    pub fn render_login(&self, query: &str) -> Result<String, CommonError> {
        let mut context = Context::new();
        context.insert("query", query);

        self.tera
            .render("login.html", &context)
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to render login template: {e}")))
    }

    pub fn render_error(&self, description: &str) -> Result<String, CommonError> {
        let mut context = Context::new();
        context.insert("description", description);

        self.tera
            .render("error.html", &context)
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to render error template: {e}")))
    }
}
