/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::time::Duration;

use tokio_rustls::TlsConnector;

use crate::{
    transport::{self, stream::SmtpStream},
    Error, SmtpClient, SmtpClientBuilder, Transport, DEFAULT_TIMEOUT,
};

use super::{
    auth::Credentials, capability::Capabilities, tls::build_tls_connector, AssertReply, State,
};

impl<'x> SmtpClientBuilder<'x> {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        SmtpClientBuilder {
            hostname: hostname.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
            tls_connector: build_tls_connector(false),
            tls_implicit: true,
            credentials: None,
            local_host: gethostname::gethostname()
                .to_str()
                .unwrap_or("[127.0.0.1]")
                .to_string(),
            debug: false,
        }
    }

    /// Allow invalid TLS certificates
    pub fn allow_invalid_certs(mut self) -> Self {
        self.tls_connector = build_tls_connector(true);
        self
    }

    /// Use a preconfigured TLS connector
    pub fn tls_connector(mut self, tls_connector: TlsConnector) -> Self {
        self.tls_connector = tls_connector;
        self
    }

    /// Start connection in TLS or upgrade with STARTTLS
    pub fn implicit_tls(mut self, tls_implicit: bool) -> Self {
        self.tls_implicit = tls_implicit;
        self
    }

    /// Authenticate after EHLO with these credentials
    pub fn credentials(mut self, credentials: impl Into<Credentials<'x>>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    /// Set the EHLO hostname
    pub fn helo_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }

    /// Sets the I/O timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Trace every command and reply through the `log` crate
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Resolves the server address, connects and runs the session bootstrap.
    pub async fn connect(&self) -> crate::Result<SmtpClient<SmtpStream>> {
        let addr = transport::resolve(&self.hostname, self.port).await?;
        if self.debug {
            log::debug!("Connecting to {} ({addr})", self.hostname);
        }
        let stream = transport::connect(
            addr,
            self.timeout,
            self.tls_implicit
                .then_some((&self.tls_connector, self.hostname.as_str())),
        )
        .await?;
        self.connect_stream(stream).await
    }

    /// Runs the session bootstrap over an already connected transport:
    /// greeting, EHLO, STARTTLS when offered and AUTH when credentials are set.
    pub async fn connect_stream<T: Transport>(&self, stream: T) -> crate::Result<SmtpClient<T>> {
        let mut client = self.session(stream);
        client.bootstrap(self.credentials.as_ref()).await?;
        Ok(client)
    }

    pub(crate) fn session<T: Transport>(&self, stream: T) -> SmtpClient<T> {
        SmtpClient {
            stream,
            timeout: self.timeout,
            state: State::Init,
            capabilities: Capabilities::default(),
            identity: String::new(),
            helo_host: self.local_host.clone(),
            tls_connector: self.tls_connector.clone(),
            tls_hostname: self.hostname.clone(),
            pending: Vec::new(),
            debug: self.debug,
        }
    }
}

impl<T: Transport> SmtpClient<T> {
    async fn bootstrap(&mut self, credentials: Option<&Credentials<'_>>) -> crate::Result<()> {
        self.require(&[State::Init])?;

        // Read greeting
        let greeting = self
            .read_reply()
            .await
            .and_then(|reply| reply.assert_code(&[220], Error::ConnectFailed));
        self.settle(greeting, State::Connected)?;

        // Obtain server capabilities
        let result = self.ehlo().await;
        self.settle(result, State::Greeted)?;

        // Upgrade to TLS if this is an insecure connection
        self.start_tls().await?;

        // Authenticate if required
        if let Some(credentials) = credentials.filter(|credentials| credentials.is_complete()) {
            self.authenticate(credentials).await?;
        }

        Ok(())
    }
}
