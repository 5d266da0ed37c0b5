use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:4566";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_ACCOUNT_ID: &str = "000000000000";

/// Where the emulator listens and which fake AWS identity to present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorConfig {
    pub endpoint: String,
    pub region: String,
    pub account_id: String,
    pub request_timeout: Duration,
}

impl EmulatorConfig {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            region: DEFAULT_REGION.to_owned(),
            account_id: DEFAULT_ACCOUNT_ID.to_owned(),
            request_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_region(mut self, region: &str) -> Self {
        region.clone_into(&mut self.region);
        self
    }

    #[must_use]
    pub fn with_account_id(mut self, account_id: &str) -> Self {
        account_id.clone_into(&mut self.account_id);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Invocation URI of a function, as an `AWS_PROXY` integration expects it.
    pub fn lambda_invocation_uri(&self, function_name: &str) -> String {
        format!(
            "arn:aws:apigateway:{region}:lambda:path/2015-03-31/functions/arn:aws:lambda:{region}:{account}:function:{function_name}/invocations",
            region = self.region,
            account = self.account_id,
        )
    }

    /// Emulators accept any signature but still route on the credential scope.
    pub fn authorization_header(&self) -> String {
        format!(
            "AWS4-HMAC-SHA256 Credential=test/20240101/{}/apigateway/aws4_request, SignedHeaders=host, Signature=0",
            self.region
        )
    }
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}
