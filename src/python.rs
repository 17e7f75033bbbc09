use std::sync::Mutex;

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use serde_json::{Map, Value};

use crate::{BlockingIpaClient, IpaClientBuilder, Params};

#[pyclass(name = "CommandDefinition", get_all)]
pub struct PyCommandDefinition {
    pub name: String,
    pub summary: String,
    pub args: Vec<String>,
    pub options: Vec<String>,
    pub required_options: Vec<String>,
}

#[pyclass(name = "Client")]
pub struct PyClient {
    inner: Mutex<BlockingIpaClient>,
}

#[pymethods]
impl PyClient {
    #[new]
    #[pyo3(signature = (host, verify_ssl=true, version=None, fallback_servers=None))]
    fn new(
        host: String,
        verify_ssl: bool,
        version: Option<String>,
        fallback_servers: Option<Vec<String>>,
    ) -> PyResult<Self> {
        let mut builder = IpaClientBuilder::new(host).with_verify_ssl(verify_ssl);
        if let Some(version) = version {
            builder = builder.with_version(version);
        }
        if let Some(servers) = fallback_servers {
            builder = builder.with_fallback_servers(servers);
        }
        let client = builder.build_blocking().map_err(to_py_value_error)?;

        Ok(Self {
            inner: Mutex::new(client),
        })
    }

    #[staticmethod]
    fn commands() -> Vec<PyCommandDefinition> {
        BlockingIpaClient::commands()
            .iter()
            .map(|command| PyCommandDefinition {
                name: command.name.to_owned(),
                summary: command.summary.to_owned(),
                args: command.args.iter().map(|arg| arg.name.to_owned()).collect(),
                options: command
                    .options
                    .iter()
                    .map(|option| option.name.to_owned())
                    .collect(),
                required_options: command
                    .options
                    .iter()
                    .filter(|option| option.required)
                    .map(|option| option.name.to_owned())
                    .collect(),
            })
            .collect()
    }

    #[getter]
    fn version(&self) -> PyResult<String> {
        Ok(self.lock()?.version().to_owned())
    }

    #[getter]
    fn current_user(&self) -> PyResult<Option<String>> {
        Ok(self.lock()?.current_user())
    }

    fn login(&self, user: String, password: String) -> PyResult<()> {
        self.lock()?
            .login(&user, &password)
            .map_err(to_py_runtime_error)
    }

    fn logout(&self) -> PyResult<()> {
        self.lock()?.logout().map_err(to_py_runtime_error)
    }

    #[pyo3(signature = (user, old_password, new_password, otp=None))]
    fn change_password(
        &self,
        user: String,
        old_password: String,
        new_password: String,
        otp: Option<String>,
    ) -> PyResult<()> {
        self.lock()?
            .change_password(&user, &old_password, &new_password, otp.as_deref())
            .map_err(to_py_runtime_error)
    }

    /// Calls a catalog command; arguments and result are JSON text.
    #[pyo3(signature = (name, args_json=None, params_json=None))]
    fn command(
        &self,
        name: String,
        args_json: Option<String>,
        params_json: Option<String>,
    ) -> PyResult<String> {
        let args = parse_args(args_json)?;
        let params = Params::from(parse_params(params_json)?);

        let value = self
            .lock()?
            .call_command(&name, args, params)
            .map_err(to_py_runtime_error)?;
        Ok(value.to_string())
    }

    /// Sends a command without consulting the catalog.
    #[pyo3(signature = (method, args_json=None, params_json=None))]
    fn raw(
        &self,
        method: String,
        args_json: Option<String>,
        params_json: Option<String>,
    ) -> PyResult<String> {
        let args = parse_args(args_json)?;
        let params = parse_params(params_json)?;

        let value = self
            .lock()?
            .call_raw(&method, args, params)
            .map_err(to_py_runtime_error)?;
        Ok(value.to_string())
    }
}

impl PyClient {
    fn lock(&self) -> PyResult<std::sync::MutexGuard<'_, BlockingIpaClient>> {
        self.inner
            .lock()
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))
    }
}

#[pymodule]
fn freeipa_client(_py: Python<'_>, module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_class::<PyCommandDefinition>()?;
    module.add_class::<PyClient>()?;
    module.add("API_VERSION", crate::ipa_api_version())?;
    Ok(())
}

fn to_py_value_error(error: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(error.to_string())
}

fn to_py_runtime_error(error: impl std::fmt::Display) -> PyErr {
    PyRuntimeError::new_err(error.to_string())
}

fn parse_args(raw_json: Option<String>) -> PyResult<Vec<Value>> {
    let Some(raw_json) = raw_json else {
        return Ok(Vec::new());
    };

    match serde_json::from_str(&raw_json).map_err(to_py_value_error)? {
        Value::Array(values) => Ok(values),
        _ => Err(PyValueError::new_err("expected a JSON array")),
    }
}

fn parse_params(raw_json: Option<String>) -> PyResult<Map<String, Value>> {
    let Some(raw_json) = raw_json else {
        return Ok(Map::new());
    };

    match serde_json::from_str(&raw_json).map_err(to_py_value_error)? {
        Value::Object(object) => Ok(object),
        _ => Err(PyValueError::new_err("expected a JSON object")),
    }
}
