//! Typed calls against the CRADLE server API.

use std::io::Read;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Endpoints, Http, HttpRequest, NetworkResult};
use crate::codec::{self, DecodedResponse, ResponseSchema};
use crate::error::SyncError;
use crate::models::{Assessment, FormClassification, HealthFacility, Patient, Reading, Referral};
use crate::sync::pipeline::{DownloadSender, ForwardingSink, ProgressFn};

/// Body of a successful `POST user/auth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub email: String,
    pub role: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub health_facility_name: Option<String>,
    pub user_id: i64,
    pub token: String,
}

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

/// Server API client.
///
/// Downloads are pushed into a [`DownloadSender`] as they are decoded. The
/// sender is always closed by the time a call returns: normally when the
/// whole body was decoded, with a failure otherwise.
#[derive(Clone)]
pub struct RestApi {
    http: Http,
    endpoints: Endpoints,
    token: Option<String>,
}

impl RestApi {
    pub fn new(http: Http, endpoints: Endpoints) -> Self {
        Self {
            http,
            endpoints,
            token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn authorized(&self, request: HttpRequest) -> HttpRequest {
        match &self.token {
            Some(token) => request.with_header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Exchange credentials for an access token.
    pub async fn authenticate(&self, email: &str, password: &str) -> NetworkResult<LoginResponse> {
        let body = match serde_json::to_vec(&Credentials {
            username: email,
            password,
        }) {
            Ok(body) => body,
            Err(e) => return NetworkResult::NetworkException(e.into()),
        };
        let request = HttpRequest::post(self.endpoints.authentication(), body)
            .with_header("Content-Type", "application/json");
        self.http
            .make_request(request, |reader: &mut dyn Read| {
                Ok(serde_json::from_reader::<_, LoginResponse>(reader)?)
            })
            .await
    }

    pub async fn sync_patients(
        &self,
        uploads: &[Patient],
        since: i64,
        sender: DownloadSender<Patient>,
        progress: ProgressFn,
    ) -> NetworkResult<DecodedResponse> {
        let url = self.endpoints.sync_patients(since);
        self.sync_entity(url, uploads, codec::PATIENT_SYNC, sender, progress).await
    }

    pub async fn sync_readings(
        &self,
        uploads: &[Reading],
        since: i64,
        sender: DownloadSender<Reading>,
        progress: ProgressFn,
    ) -> NetworkResult<DecodedResponse> {
        let url = self.endpoints.sync_readings(since);
        self.sync_entity(url, uploads, codec::READING_SYNC, sender, progress).await
    }

    pub async fn sync_referrals(
        &self,
        uploads: &[Referral],
        since: i64,
        sender: DownloadSender<Referral>,
        progress: ProgressFn,
    ) -> NetworkResult<DecodedResponse> {
        let url = self.endpoints.sync_referrals(since);
        self.sync_entity(url, uploads, codec::REFERRAL_SYNC, sender, progress).await
    }

    pub async fn sync_assessments(
        &self,
        uploads: &[Assessment],
        since: i64,
        sender: DownloadSender<Assessment>,
        progress: ProgressFn,
    ) -> NetworkResult<DecodedResponse> {
        let url = self.endpoints.sync_assessments(since);
        self.sync_entity(url, uploads, codec::ASSESSMENT_SYNC, sender, progress).await
    }

    pub async fn get_health_facilities(
        &self,
        sender: DownloadSender<HealthFacility>,
        progress: ProgressFn,
    ) -> NetworkResult<DecodedResponse> {
        self.download_array(self.endpoints.health_facilities(), sender, progress).await
    }

    pub async fn get_form_templates(
        &self,
        sender: DownloadSender<FormClassification>,
        progress: ProgressFn,
    ) -> NetworkResult<DecodedResponse> {
        self.download_array(self.endpoints.form_classifications(), sender, progress).await
    }

    pub async fn get_all_patients(
        &self,
        sender: DownloadSender<Patient>,
        progress: ProgressFn,
    ) -> NetworkResult<DecodedResponse> {
        self.download_array(self.endpoints.all_patients(), sender, progress).await
    }

    pub async fn get_all_readings(
        &self,
        sender: DownloadSender<Reading>,
        progress: ProgressFn,
    ) -> NetworkResult<DecodedResponse> {
        self.download_array(self.endpoints.all_readings(), sender, progress).await
    }

    pub async fn get_all_referrals(
        &self,
        sender: DownloadSender<Referral>,
        progress: ProgressFn,
    ) -> NetworkResult<DecodedResponse> {
        self.download_array(self.endpoints.all_referrals(), sender, progress).await
    }

    pub async fn get_all_assessments(
        &self,
        sender: DownloadSender<Assessment>,
        progress: ProgressFn,
    ) -> NetworkResult<DecodedResponse> {
        self.download_array(self.endpoints.all_assessments(), sender, progress).await
    }

    /// `POST` the dirty records and stream the server's delta back.
    async fn sync_entity<U, T>(
        &self,
        url: String,
        uploads: &[U],
        schema: ResponseSchema,
        sender: DownloadSender<T>,
        progress: ProgressFn,
    ) -> NetworkResult<DecodedResponse>
    where
        U: Serialize,
        T: DeserializeOwned + Send + 'static,
    {
        let body = match serde_json::to_vec(uploads) {
            Ok(body) => body,
            Err(e) => return NetworkResult::NetworkException(e.into()),
        };
        let request = self
            .authorized(HttpRequest::post(url, body))
            .with_header("Content-Type", "application/json");

        self.http
            .make_request(request, move |reader: &mut dyn Read| {
                let mut sink = ForwardingSink::new(sender, progress);
                finish_sink(codec::decode_sync_response::<T, _, _>(reader, schema, &mut sink), sink)
            })
            .await
    }

    /// `GET` a bare array and stream its elements.
    async fn download_array<T>(
        &self,
        url: String,
        sender: DownloadSender<T>,
        progress: ProgressFn,
    ) -> NetworkResult<DecodedResponse>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let request = self.authorized(HttpRequest::get(url));
        self.http
            .make_request(request, move |reader: &mut dyn Read| {
                let mut sink = ForwardingSink::new(sender, progress);
                let decoded = codec::decode_array::<T, _, _>(reader, &mut sink).map(|received| DecodedResponse {
                    total: None,
                    received,
                    errors: None,
                });
                finish_sink(decoded, sink)
            })
            .await
    }
}

/// Close the sink's channel according to how decoding went.
fn finish_sink<T>(
    decoded: Result<DecodedResponse, SyncError>,
    sink: ForwardingSink<T>,
) -> Result<DecodedResponse, SyncError> {
    match decoded {
        Ok(decoded) => {
            sink.finish()?;
            Ok(decoded)
        }
        Err(e) => {
            sink.abort(&e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Method, MockHttpClient, MockReply};
    use crate::sync::pipeline::{download_channel, Delivery};
    use std::sync::Arc;

    fn api(mock: Arc<MockHttpClient>) -> RestApi {
        RestApi::new(Http::new(mock, 4), Endpoints::from_base("https://cradle.test/api"))
    }

    fn drain<T>(mut rx: crate::sync::pipeline::DownloadReceiver<T>) -> (Vec<T>, bool) {
        let mut items = Vec::new();
        let mut completed = false;
        while let Some(delivery) = rx.recv_blocking() {
            match delivery {
                Delivery::Item(item) => items.push(item),
                Delivery::Complete => completed = true,
                Delivery::Failed(_) => break,
            }
        }
        (items, completed)
    }

    #[tokio::test]
    async fn test_authenticate() {
        let mock = Arc::new(MockHttpClient::new());
        mock.on(
            Method::Post,
            "/user/auth",
            MockReply::json(
                200,
                r#"{"email":"vht@cradle.org","role":"VHT","firstName":"Asha","healthFacilityName":"H0000","userId":12,"token":"tok"}"#,
            ),
        );

        let result = api(mock.clone()).authenticate("vht@cradle.org", "pw").await;
        let login = result.unwrapped().unwrap();
        assert_eq!(login.user_id, 12);
        assert_eq!(login.token, "tok");

        let sent = &mock.requests()[0];
        let body: serde_json::Value = serde_json::from_slice(sent.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["username"], "vht@cradle.org");
        assert_eq!(sent.header("Authorization"), None);
        assert_eq!(sent.header_count("Content-Type"), 1);
    }

    #[tokio::test]
    async fn test_sync_sends_bearer_and_uploads() {
        let mock = Arc::new(MockHttpClient::new());
        mock.on(
            Method::Post,
            "/sync/patients",
            MockReply::json(200, r#"{"total":1,"patients":[{"id":"p9","name":"New","sex":"MALE"}]}"#),
        );
        let (sender, receiver) = download_channel(8);
        let mut dirty = Patient::new("Local".into(), crate::models::Sex::Female);
        dirty.id = "p1".into();

        let result = api(mock.clone())
            .with_token("secret")
            .sync_patients(&[dirty], 42, sender, Box::new(|_, _| {}))
            .await;
        assert_eq!(result.value().map(|d| d.received), Some(1));

        let (items, completed) = tokio::task::spawn_blocking(move || drain(receiver)).await.unwrap();
        assert!(completed);
        assert_eq!(items[0].id, "p9");

        let sent = &mock.requests()[0];
        assert!(sent.url.ends_with("/sync/patients?since=42"));
        assert_eq!(sent.header("Authorization"), Some("Bearer secret"));
        assert_eq!(sent.header_count("Content-Type"), 1);
        let uploaded: serde_json::Value = serde_json::from_slice(sent.body.as_ref().unwrap()).unwrap();
        assert_eq!(uploaded[0]["id"], "p1");
    }

    #[tokio::test]
    async fn test_malformed_download_fails_channel() {
        let mock = Arc::new(MockHttpClient::new());
        mock.on(Method::Get, "/facilities", MockReply::json(200, r#"[{"name":"H1"},{"name":7}]"#));
        let (sender, receiver) = download_channel::<HealthFacility>(8);

        let result = api(mock).get_health_facilities(sender, Box::new(|_, _| {})).await;
        assert!(matches!(result, NetworkResult::NetworkException(SyncError::Json(_))));

        let (items, completed) = tokio::task::spawn_blocking(move || drain(receiver)).await.unwrap();
        assert!(!completed);
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_is_failure() {
        let mock = Arc::new(MockHttpClient::new());
        mock.on(Method::Post, "/sync/readings", MockReply::json(401, "expired"));
        let (sender, receiver) = download_channel::<Reading>(8);

        let result = api(mock).with_token("old").sync_readings(&[], 1, sender, Box::new(|_, _| {})).await;
        assert_eq!(result.status_code(), Some(401));

        let (items, completed) = tokio::task::spawn_blocking(move || drain(receiver)).await.unwrap();
        assert!(items.is_empty());
        assert!(!completed);
    }
}
