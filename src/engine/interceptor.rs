//! Request interceptors applied to every outgoing engine request.

use secrecy::{ExposeSecret, SecretString};

/// Hook to decorate outgoing requests (auth headers, tracing headers, ...).
pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder;
}

/// Adds HTTP basic authentication.
pub struct BasicAuthProvider {
    username: String,
    password: SecretString,
}

impl BasicAuthProvider {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

impl RequestInterceptor for BasicAuthProvider {
    fn intercept(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.basic_auth(&self.username, Some(self.password.expose_secret()))
    }
}

impl std::fmt::Debug for BasicAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthProvider")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_sets_authorization_header() {
        let provider = BasicAuthProvider::new("demo", SecretString::from("secret".to_string()));
        let client = reqwest::Client::new();
        let request = provider
            .intercept(client.post("http://localhost/engine-rest"))
            .build()
            .unwrap();

        let header = request.headers()["authorization"].to_str().unwrap();
        // base64("demo:secret")
        assert_eq!(header, "Basic ZGVtbzpzZWNyZXQ=");
    }

    #[test]
    fn debug_hides_password() {
        let provider = BasicAuthProvider::new("demo", SecretString::from("secret".to_string()));
        assert!(!format!("{provider:?}").contains("secret"));
    }
}
