//! Transport and agent doubles recording what the engine hands them

use std::sync::{
	atomic::{AtomicBool, Ordering},
	Mutex,
};

use async_trait::async_trait;
use vnm_core::{
	overlay::{AgentClient, AgentRequest, OverlayError},
	DeviceTransaction, Transport,
};
use vnm_openflow::{FlowMod, FlowTable};

/// Keeps accepted transactions until the test completes them.
#[derive(Default)]
pub struct RecordingTransport {
	accepted: Mutex<Vec<DeviceTransaction>>,
	busy: AtomicBool,
}

impl RecordingTransport {
	/// Makes the transport hand every transaction back.
	pub fn set_busy(&self, busy: bool) {
		self.busy.store(busy, Ordering::SeqCst);
	}

	pub fn pending(&self) -> usize {
		self.accepted.lock().unwrap().len()
	}

	pub fn messages(&self) -> Vec<FlowMod> {
		self.accepted
			.lock()
			.unwrap()
			.iter()
			.map(|transaction| transaction.message.clone())
			.collect()
	}

	pub fn take(&self) -> Vec<DeviceTransaction> {
		std::mem::take(&mut *self.accepted.lock().unwrap())
	}

	/// Applies every pending transaction to `table` and reports it as succeeded.
	pub fn complete_on(&self, table: &mut FlowTable) -> usize {
		let transactions = self.take();
		let n = transactions.len();
		for transaction in transactions {
			table.apply(&transaction.message);
			transaction.succeeded();
		}
		n
	}

	pub fn succeed_all(&self) -> usize {
		self.complete_on(&mut FlowTable::default())
	}
}

impl Transport for RecordingTransport {
	fn execute_transaction(&self, transaction: DeviceTransaction) -> Result<(), DeviceTransaction> {
		if self.busy.load(Ordering::SeqCst) {
			return Err(transaction);
		}

		self.accepted.lock().unwrap().push(transaction);
		Ok(())
	}
}

type Responder = Box<dyn Fn(&AgentRequest) -> u16 + Send + Sync>;

/// Answers agent and reflector requests with canned status codes.
pub struct MockAgent {
	requests: Mutex<Vec<AgentRequest>>,
	responder: Responder,
}

impl MockAgent {
	pub fn new(responder: impl Fn(&AgentRequest) -> u16 + Send + Sync + 'static) -> Self {
		Self {
			requests: Mutex::new(Vec::new()),
			responder: Box::new(responder),
		}
	}

	pub fn always(status: u16) -> Self {
		Self::new(move |_| status)
	}

	pub fn requests(&self) -> Vec<AgentRequest> {
		self.requests.lock().unwrap().clone()
	}
}

#[async_trait]
impl AgentClient for MockAgent {
	async fn send(&self, request: AgentRequest) -> Result<u16, OverlayError> {
		let status = (self.responder)(&request);
		self.requests.lock().unwrap().push(request);
		Ok(status)
	}
}
