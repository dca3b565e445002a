//! Forward models mapping parameters to predicted observations.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::debug;

use crate::error::ModelError;

/// A pure function of the parameters for the covariates captured at construction.
pub trait ForwardModel {
    fn predict(&self, parameters: &[f64]) -> Result<Vec<f64>, ModelError>;

    fn covariates(&self) -> &[f64];
}

/// `f(x) = slope * x + offset`, parameters ordered `[slope, offset]`.
#[derive(Debug, Clone)]
pub struct LinearModel {
    covariates: Vec<f64>,
}

impl LinearModel {
    pub fn new(covariates: Vec<f64>) -> Self {
        Self { covariates }
    }
}

impl ForwardModel for LinearModel {
    fn predict(&self, parameters: &[f64]) -> Result<Vec<f64>, ModelError> {
        let [slope, offset] = parameters else {
            return Err(ModelError::ParameterCount {
                expected: 2,
                found: parameters.len(),
            });
        };
        Ok(self
            .covariates
            .iter()
            .map(|x| slope * x + offset)
            .collect())
    }

    fn covariates(&self) -> &[f64] {
        &self.covariates
    }
}

/// Posts form-encoded fields to a remote service and returns the response body.
pub trait Transport {
    fn post_form(&self, url: &str, fields: &[(&str, String)]) -> Result<String, ModelError>;
}

/// A request captured by [`ReplayTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub fields: Vec<(String, String)>,
}

/// Replays canned responses in order and records every request it receives.
#[derive(Debug, Default)]
pub struct ReplayTransport {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ReplayTransport {
    pub fn new(responses: impl IntoIterator<Item = String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Transport for ReplayTransport {
    fn post_form(&self, url: &str, fields: &[(&str, String)]) -> Result<String, ModelError> {
        let mut requests = self
            .requests
            .lock()
            .map_err(|_| ModelError::Transport("request log poisoned".to_string()))?;
        requests.push(RecordedRequest {
            url: url.to_string(),
            fields: fields
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
        });
        self.responses
            .lock()
            .map_err(|_| ModelError::Transport("response queue poisoned".to_string()))?
            .pop_front()
            .ok_or_else(|| ModelError::Transport("no recorded response left".to_string()))
    }
}

/// Forward model backed by a remote radiative-transfer service.
///
/// The configuration template is made of `<KEY>value` lines. Every parameter
/// is written into the line of its key (appended if the template lacks it),
/// the rendered file is posted along with `type=rad` and `whdr=n`, and the
/// second column of each numeric row in the reply is taken as the prediction.
pub struct RemoteModel<T> {
    covariates: Vec<f64>,
    endpoint: String,
    template: String,
    parameter_keys: Vec<String>,
    transport: T,
}

impl<T: Transport> RemoteModel<T> {
    pub fn new(
        covariates: Vec<f64>,
        endpoint: impl Into<String>,
        template: impl Into<String>,
        parameter_keys: Vec<String>,
        transport: T,
    ) -> Self {
        Self {
            covariates,
            endpoint: endpoint.into(),
            template: template.into(),
            parameter_keys,
            transport,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn render_config(&self, parameters: &[f64]) -> Result<String, ModelError> {
        if parameters.len() != self.parameter_keys.len() {
            return Err(ModelError::ParameterCount {
                expected: self.parameter_keys.len(),
                found: parameters.len(),
            });
        }
        let mut written = vec![false; parameters.len()];
        let mut lines: Vec<String> = self
            .template
            .lines()
            .map(|line| {
                for (idx, key) in self.parameter_keys.iter().enumerate() {
                    let tag = format!("<{key}>");
                    if line.starts_with(&tag) {
                        written[idx] = true;
                        return format!("{tag}{}", parameters[idx]);
                    }
                }
                line.to_string()
            })
            .collect();
        for (idx, key) in self.parameter_keys.iter().enumerate() {
            if !written[idx] {
                lines.push(format!("<{key}>{}", parameters[idx]));
            }
        }
        Ok(lines.join("\n"))
    }

    fn parse_response(&self, body: &str) -> Result<Vec<f64>, ModelError> {
        let mut predictions = Vec::with_capacity(self.covariates.len());
        for (idx, line) in body.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let column = line
                .split_whitespace()
                .nth(1)
                .ok_or_else(|| ModelError::MalformedResponse {
                    line: idx + 1,
                    reason: "expected at least two columns".to_string(),
                })?;
            let value = column
                .parse::<f64>()
                .map_err(|err| ModelError::MalformedResponse {
                    line: idx + 1,
                    reason: err.to_string(),
                })?;
            predictions.push(value);
        }
        if predictions.len() != self.covariates.len() {
            return Err(ModelError::PredictionCount {
                expected: self.covariates.len(),
                found: predictions.len(),
            });
        }
        Ok(predictions)
    }
}

impl<T: Transport> ForwardModel for RemoteModel<T> {
    fn predict(&self, parameters: &[f64]) -> Result<Vec<f64>, ModelError> {
        let config = self.render_config(parameters)?;
        let fields = [
            ("type", "rad".to_string()),
            ("whdr", "n".to_string()),
            ("file", config),
        ];
        let body = self.transport.post_form(&self.endpoint, &fields)?;
        debug!(endpoint = %self.endpoint, bytes = body.len(), "remote model replied");
        self.parse_response(&body)
    }

    fn covariates(&self) -> &[f64] {
        &self.covariates
    }
}
