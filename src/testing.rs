//! Scripted transport for exercising the probes without hardware.

use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Error};

use crate::transport::{ControlRequest, DeviceHandle};
use crate::usb::InterfaceNum;

/// A transport that plays back canned control-transfer responses and
/// records every transfer, claim and release it sees. Requests with no
/// scripted response fail, standing in for a timeout or stall.
#[derive(Default)]
pub struct ScriptedHandle {
    responses: HashMap<(u8, u8, u16, u16), Vec<u8>>,
    raw: Option<Vec<u8>>,
    refuse_claims: bool,
    pub transfers: RefCell<Vec<ControlRequest>>,
    pub claims: RefCell<Vec<InterfaceNum>>,
    pub releases: RefCell<Vec<InterfaceNum>>,
}

impl ScriptedHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, request: ControlRequest, bytes: &[u8]) -> Self {
        self.responses.insert(
            (request.request_type, request.request,
             request.value, request.index),
            bytes.to_vec());
        self
    }

    pub fn with_raw_descriptors(mut self, raw: &[u8]) -> Self {
        self.raw = Some(raw.to_vec());
        self
    }

    pub fn refusing_claims(mut self) -> Self {
        self.refuse_claims = true;
        self
    }
}

impl DeviceHandle for ScriptedHandle {
    fn control_in(&self,
                  request: ControlRequest,
                  buf: &mut [u8],
                  _timeout: Duration)
        -> Result<usize, Error>
    {
        self.transfers.borrow_mut().push(request);
        let key = (request.request_type, request.request,
                   request.value, request.index);
        match self.responses.get(&key) {
            Some(bytes) => {
                let count = bytes.len().min(buf.len());
                buf[..count].copy_from_slice(&bytes[..count]);
                Ok(count)
            }
            None => bail!("No scripted response for {request:?}"),
        }
    }

    fn raw_descriptors(&self) -> Option<Vec<u8>> {
        self.raw.clone()
    }

    fn claim_interface(&self, number: InterfaceNum, _force: bool) -> bool {
        self.claims.borrow_mut().push(number);
        !self.refuse_claims
    }

    fn release_interface(&self, number: InterfaceNum) -> bool {
        self.releases.borrow_mut().push(number);
        true
    }
}
