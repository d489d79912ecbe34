use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use crate::config::LmsConfig;
use crate::error::{IngestError, Result};
use crate::models::{Course, RawGrades, RawUser, Verbatim};

const SERVER_PATH: &str = "/webservice/rest/server.php";
const USER_AGENT: &str = concat!("lms-ingest/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsFunction {
    ListCourses,
    ListEnrolledUsers,
    UserGradeItems,
}

impl WsFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WsFunction::ListCourses => "core_course_get_courses",
            WsFunction::ListEnrolledUsers => "core_enrol_get_enrolled_users",
            WsFunction::UserGradeItems => "gradereport_user_get_grade_items",
        }
    }
}

/// The three LMS web-service calls the pipeline depends on. Users and grades come back
/// [`Verbatim`] so they can be audited exactly as received.
#[async_trait]
pub trait LmsApi: Send + Sync {
    async fn list_courses(&self) -> Result<Vec<Course>>;

    async fn list_enrolled_users(&self, course_id: i64) -> Result<Vec<Verbatim<RawUser>>>;

    async fn fetch_user_grades(&self, course_id: i64, user_id: i64) -> Result<Verbatim<RawGrades>>;
}

pub struct LmsClient {
    http: Client,
    endpoint: String,
    token: String,
}

impl LmsClient {
    pub fn new(config: &LmsConfig) -> Result<Self> {
        let validated = config.validate()?;
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| IngestError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: endpoint(&validated.base_url),
            token: validated.token,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        function: WsFunction,
        params: &[(&str, String)],
    ) -> Result<T> {
        debug!(function = function.as_str(), "Calling LMS web service");

        let query = query_params(&self.token, function, params);
        let body = self.request(&query).await.map_err(|e| {
            error!(function = function.as_str(), error = %e, "LMS request failed");
            e
        })?;

        check_exception(&body).map_err(|e| {
            error!(function = function.as_str(), error = %e, "LMS exception");
            e
        })?;

        serde_json::from_value(body).map_err(|e| {
            IngestError::ExternalService(format!(
                "unexpected payload from {}: {e}",
                function.as_str()
            ))
        })
    }

    async fn request(&self, query: &[(&str, String)]) -> Result<Value> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(query)
            .send()
            .await
            .map_err(gateway)?
            .error_for_status()
            .map_err(gateway)?;

        response.json::<Value>().await.map_err(gateway)
    }
}

#[async_trait]
impl LmsApi for LmsClient {
    async fn list_courses(&self) -> Result<Vec<Course>> {
        debug!("Fetching all courses from LMS");
        self.call(WsFunction::ListCourses, &[]).await
    }

    async fn list_enrolled_users(&self, course_id: i64) -> Result<Vec<Verbatim<RawUser>>> {
        debug!(course_id, "Fetching enrolled users");
        self.call(
            WsFunction::ListEnrolledUsers,
            &[("courseid", course_id.to_string())],
        )
        .await
    }

    async fn fetch_user_grades(&self, course_id: i64, user_id: i64) -> Result<Verbatim<RawGrades>> {
        debug!(course_id, user_id, "Fetching user grades");
        self.call(
            WsFunction::UserGradeItems,
            &[
                ("userid", user_id.to_string()),
                ("courseid", course_id.to_string()),
            ],
        )
        .await
    }
}

/// The request URL carries `wstoken`, so it is stripped before the error goes anywhere.
fn gateway(err: reqwest::Error) -> IngestError {
    IngestError::ExternalService(err.without_url().to_string())
}

pub fn endpoint(base_url: &str) -> String {
    format!("{}{SERVER_PATH}", base_url.trim_end_matches('/'))
}

pub fn query_params<'a>(
    token: &str,
    function: WsFunction,
    params: &[(&'a str, String)],
) -> Vec<(&'a str, String)> {
    let mut query = vec![
        ("wstoken", token.to_string()),
        ("wsfunction", function.as_str().to_string()),
        ("moodlewsrestformat", "json".to_string()),
    ];
    query.extend(params.iter().cloned());
    query
}

/// The LMS answers HTTP 200 even on failure, with `{exception, message}` as the body.
pub fn check_exception(body: &Value) -> Result<()> {
    let Some(exception) = body.get("exception").filter(|v| !v.is_null()) else {
        return Ok(());
    };

    let message = body
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| exception.as_str())
        .unwrap_or("unknown LMS exception");

    Err(IngestError::ExternalService(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const TOKEN: &str = "s3cret-token";

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\
             connection: close\r\n\r\n{body}",
            body.len()
        )
    }

    /// Serves one connection with `response`, or holds it open without answering when
    /// `response` is `None`.
    async fn client_for(response: Option<String>) -> LmsClient {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            match response {
                Some(response) => {
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
                None => while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {},
            }
        });

        LmsClient::new(&LmsConfig {
            base_url: Some(format!("http://{addr}")),
            token: Some(TOKEN.to_string()),
            timeout: Duration::from_millis(300),
            concurrency: 1,
        })
        .unwrap()
    }

    fn assert_redacted_gateway(err: &IngestError) {
        assert!(err.is_gateway(), "{err}");
        assert!(!err.to_string().contains(TOKEN), "{err}");
    }

    #[tokio::test]
    async fn decodes_course_listing() {
        let body = r#"[{"id":1,"fullname":"Site","shortname":"SITE"},
                       {"id":2,"fullname":"Intro","shortname":"CS101"}]"#;
        let client = client_for(Some(http_response("200 OK", body))).await;

        let courses = client.list_courses().await.unwrap();
        assert_eq!(courses.len(), 2);
        assert_eq!(courses[1].shortname, "CS101");
    }

    #[tokio::test]
    async fn enrolled_users_keep_the_received_json() {
        let body = r#"[{"id":7,"firstname":"A","lastname":"B","email":null,"lastaccess":null}]"#;
        let client = client_for(Some(http_response("200 OK", body))).await;

        let users = client.list_enrolled_users(2).await.unwrap();
        assert_eq!(users[0].id, 7);
        assert_eq!(
            serde_json::to_value(&users).unwrap(),
            serde_json::from_str::<Value>(body).unwrap()
        );
    }

    #[tokio::test]
    async fn exception_body_on_http_200_is_a_gateway_error() {
        let body = r#"{"exception":"moodle_exception","message":"Invalid token"}"#;
        let client = client_for(Some(http_response("200 OK", body))).await;

        let err = client.list_courses().await.unwrap_err();
        assert_redacted_gateway(&err);
        assert_eq!(err.to_string(), "Failed to connect to LMS: Invalid token");
    }

    #[tokio::test]
    async fn server_error_status_is_a_gateway_error() {
        let client = client_for(Some(http_response("500 Internal Server Error", "{}"))).await;

        let err = client.list_enrolled_users(2).await.unwrap_err();
        assert_redacted_gateway(&err);
    }

    #[tokio::test]
    async fn undecodable_body_is_a_gateway_error() {
        let client = client_for(Some(http_response("200 OK", "<html>maintenance</html>"))).await;

        let err = client.fetch_user_grades(2, 7).await.unwrap_err();
        assert_redacted_gateway(&err);
    }

    #[tokio::test]
    async fn unexpected_shape_is_a_gateway_error() {
        let client = client_for(Some(http_response("200 OK", r#"{"courses":[]}"#))).await;

        let err = client.list_courses().await.unwrap_err();
        assert_redacted_gateway(&err);
    }

    #[tokio::test]
    async fn timeout_is_a_gateway_error_without_the_token() {
        let client = client_for(None).await;

        let err = client.list_courses().await.unwrap_err();
        assert_redacted_gateway(&err);
    }

    #[test]
    fn endpoint_appends_server_path() {
        assert_eq!(
            endpoint("https://lms.example.edu/"),
            "https://lms.example.edu/webservice/rest/server.php"
        );
    }

    #[test]
    fn query_carries_token_function_and_format() {
        let query = query_params(
            "secret",
            WsFunction::UserGradeItems,
            &[("userid", "4".to_string()), ("courseid", "2".to_string())],
        );
        assert_eq!(
            query,
            vec![
                ("wstoken", "secret".to_string()),
                ("wsfunction", "gradereport_user_get_grade_items".to_string()),
                ("moodlewsrestformat", "json".to_string()),
                ("userid", "4".to_string()),
                ("courseid", "2".to_string()),
            ]
        );
    }

    #[test]
    fn in_band_exception_becomes_gateway_error() {
        let body = json!({
            "exception": "webservice_access_exception",
            "errorcode": "accessexception",
            "message": "Access control exception"
        });
        let err = check_exception(&body).unwrap_err();
        assert!(err.is_gateway());
        assert_eq!(err.to_string(), "Failed to connect to LMS: Access control exception");
    }

    #[test]
    fn exception_without_message_uses_exception_name() {
        let err = check_exception(&json!({"exception": "invalid_token"})).unwrap_err();
        assert!(err.to_string().contains("invalid_token"));
    }

    #[test]
    fn regular_payloads_pass() {
        assert!(check_exception(&json!([{"id": 1}])).is_ok());
        assert!(check_exception(&json!({"usergrades": []})).is_ok());
        assert!(check_exception(&json!({"exception": null})).is_ok());
    }

    #[test]
    fn missing_token_fails_at_construction() {
        let config = LmsConfig {
            base_url: Some("https://lms.example.edu".into()),
            ..LmsConfig::default()
        };
        assert!(matches!(
            LmsClient::new(&config),
            Err(IngestError::Configuration(_))
        ));
    }
}
