//! Typed protocol client used by page agents.

use psp_core::protocol::ScanCompleteReport;
use psp_core::{CatalogDocument, DetectionReport, DetectionResult, Generation, Request, Response, TabId};

use crate::error::ClientError;
use crate::transport::Transport;

pub struct ProtocolClient<T> {
    transport: T,
}

impl<T: Transport> ProtocolClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn call(&self, request: Request) -> Result<Response, ClientError> {
        match self.transport.send(&request).await? {
            Response::Error { code, message } => Err(ClientError::Remote { code, message }),
            response => Ok(response),
        }
    }

    fn unexpected(request: &'static str, response: Response) -> ClientError {
        ClientError::UnexpectedResponse {
            request,
            response: format!("{:?}", response),
        }
    }

    pub async fn get_catalog(&self) -> Result<CatalogDocument, ClientError> {
        match self.call(Request::GetCatalog).await? {
            Response::Catalog { catalog } => Ok(catalog),
            other => Err(Self::unexpected("getCatalog", other)),
        }
    }

    pub async fn get_exempt_domains(&self) -> Result<Vec<String>, ClientError> {
        match self.call(Request::GetExemptDomains).await? {
            Response::ExemptDomains { domains } => Ok(domains),
            other => Err(Self::unexpected("getExemptDomains", other)),
        }
    }

    /// Returns whether the coordinator applied the report.
    pub async fn report_detection(&self, report: DetectionReport) -> Result<bool, ClientError> {
        match self.call(Request::ReportDetection(report)).await? {
            Response::Ack { applied } => Ok(applied),
            other => Err(Self::unexpected("reportDetection", other)),
        }
    }

    pub async fn report_scan_complete(&self, report: ScanCompleteReport) -> Result<bool, ClientError> {
        match self.call(Request::ReportScanComplete(report)).await? {
            Response::Ack { applied } => Ok(applied),
            other => Err(Self::unexpected("reportScanComplete", other)),
        }
    }

    pub async fn current_result(&self) -> Result<Option<DetectionResult>, ClientError> {
        match self.call(Request::GetCurrentResult).await? {
            Response::CurrentResult { result } => Ok(result),
            other => Err(Self::unexpected("getCurrentResult", other)),
        }
    }

    /// The caller's tab id and its current generation.
    pub async fn caller_tab(&self) -> Result<(TabId, Generation), ClientError> {
        match self.call(Request::GetCallerTabId).await? {
            Response::CallerTabId { tab_id, generation } => Ok((tab_id, generation)),
            other => Err(Self::unexpected("getCallerTabId", other)),
        }
    }

    pub async fn has_state(&self) -> Result<bool, ClientError> {
        match self.call(Request::HasStateForCallerTab).await? {
            Response::HasState { has_state } => Ok(has_state),
            other => Err(Self::unexpected("hasStateForCallerTab", other)),
        }
    }
}
