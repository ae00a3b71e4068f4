use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{NetRequest, NetResponse, Network};
use crate::error::{Error, Result};

/// Network fake with a fixed route table and an offline switch.
pub(crate) struct ScriptedNetwork {
  routes: Mutex<HashMap<String, NetResponse>>,
  online: AtomicBool,
  calls: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self {
      routes: Mutex::new(HashMap::new()),
      online: AtomicBool::new(true),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn route(&self, url: &str, response: NetResponse) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &NetRequest) -> Result<NetResponse> {
    self.calls.lock().unwrap().push(request.url.to_string());

    if !self.online.load(Ordering::SeqCst) {
      return Err(Error::NetworkUnreachable("offline".into()));
    }

    let response = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
    Ok(response.unwrap_or(NetResponse {
      status: 404,
      headers: Vec::new(),
      body: b"not found".to_vec(),
    }))
  }
}
