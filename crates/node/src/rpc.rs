//! gRPC service implementations over the node façade.
//!
//! Every handler authenticates first, translates the request, calls the
//! façade, and maps error kinds onto status codes: not-found → `NotFound`,
//! validation → `InvalidArgument`, paused → `Unavailable`, quota and caps →
//! `ResourceExhausted`, missing role → `PermissionDenied`, anything else →
//! `Internal` with the raw error logged.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::error;

use nhb_api::chain::{ConsensusApi, SubmitOutcome};
use nhb_ipc::auth::{AuthChain, AuthContext};
use nhb_ipc::consensus::consensus_service_server::ConsensusService;
use nhb_ipc::consensus::{
    CommitBlockRequest, CommitBlockResponse, CreateBlockRequest, CreateBlockResponse,
    GetBlockByHeightRequest, GetBlockByHeightResponse, GetHeightRequest, GetHeightResponse,
    GetLastCommitHashRequest, GetLastCommitHashResponse, GetMempoolRequest, GetMempoolResponse,
    GetStatusRequest, GetStatusResponse, GetValidatorSetRequest, GetValidatorSetResponse,
    SubmitTransactionRequest, SubmitTransactionResponse, SubmitTxEnvelopeRequest, Validator,
};
use nhb_ipc::query::query_service_server::QueryService;
use nhb_ipc::query::{
    Event, EventAttribute, QueryPrefixEntry, QueryPrefixRequest, QueryStateRequest,
    QueryStateResponse, SimulateTxRequest, SimulateTxResponse,
};
use nhb_types::block::Block;
use nhb_types::codec::{from_bytes_canonical, to_bytes_canonical};
use nhb_types::envelope::SignedEnvelope;
use nhb_types::error::{NodeError, TxError};
use nhb_types::tx::Transaction;

/// Shared handler context.
#[derive(Clone)]
pub struct RpcContext {
    /// The node façade.
    pub node: Arc<dyn ConsensusApi>,
    /// The authentication chain every call runs first.
    pub auth: Arc<AuthChain>,
}

impl RpcContext {
    fn authenticate<T>(&self, request: &Request<T>) -> Result<(), Status> {
        let peer_certs: Option<Vec<Vec<u8>>> = request
            .peer_certs()
            .map(|certs| certs.iter().map(|c| c.clone().into_inner()).collect());
        let ctx = AuthContext {
            metadata: request.metadata(),
            peer_certs: peer_certs.as_deref(),
        };
        self.auth.authenticate(&ctx)
    }
}

fn status_from(err: NodeError) -> Status {
    match &err {
        NodeError::NotFound(_) => Status::not_found(err.to_string()),
        NodeError::MempoolFull => Status::resource_exhausted(err.to_string()),
        NodeError::InvalidArgument(_) | NodeError::Block(_) => {
            Status::invalid_argument(err.to_string())
        }
        NodeError::Tx(tx_err) => match tx_err {
            TxError::Paused(_) => Status::unavailable(err.to_string()),
            TxError::QuotaExceeded(_)
            | TxError::EmissionCapExceeded { .. }
            | TxError::PaymasterOverLimit(_) => Status::resource_exhausted(err.to_string()),
            TxError::RoleMissing(_) => Status::permission_denied(err.to_string()),
            TxError::State(_) => {
                error!(target: "rpc", error = %err, "internal error serving RPC");
                Status::internal("internal error")
            }
            _ => Status::invalid_argument(err.to_string()),
        },
        NodeError::State(_) | NodeError::Internal(_) => {
            error!(target: "rpc", error = %err, "internal error serving RPC");
            Status::internal("internal error")
        }
    }
}

fn submit_response(tx_hash: nhb_types::Hash, outcome: SubmitOutcome) -> SubmitTransactionResponse {
    SubmitTransactionResponse {
        tx_hash: hex::encode(tx_hash),
        status: match outcome {
            SubmitOutcome::Accepted => "accepted".to_string(),
            SubmitOutcome::AlreadyIncluded => "already_included".to_string(),
        },
    }
}

#[tonic::async_trait]
impl ConsensusService for RpcContext {
    async fn submit_transaction(
        &self,
        request: Request<SubmitTransactionRequest>,
    ) -> Result<Response<SubmitTransactionResponse>, Status> {
        self.authenticate(&request)?;
        let req = request.into_inner();
        let tx: Transaction =
            from_bytes_canonical(&req.transaction).map_err(|e| Status::invalid_argument(e.to_string()))?;
        let tx_hash = tx.hash();
        let outcome = self
            .node
            .submit_transaction(tx)
            .await
            .map_err(status_from)?;
        Ok(Response::new(submit_response(tx_hash, outcome)))
    }

    async fn submit_tx_envelope(
        &self,
        request: Request<SubmitTxEnvelopeRequest>,
    ) -> Result<Response<SubmitTransactionResponse>, Status> {
        self.authenticate(&request)?;
        let req = request.into_inner();
        let envelope: SignedEnvelope =
            from_bytes_canonical(&req.envelope).map_err(|e| Status::invalid_argument(e.to_string()))?;
        let tx_hash = envelope
            .decode_transaction()
            .map(|tx| tx.hash())
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let outcome = self
            .node
            .submit_envelope(envelope)
            .await
            .map_err(status_from)?;
        Ok(Response::new(submit_response(tx_hash, outcome)))
    }

    async fn create_block(
        &self,
        request: Request<CreateBlockRequest>,
    ) -> Result<Response<CreateBlockResponse>, Status> {
        self.authenticate(&request)?;
        let req = request.into_inner();
        let txs = if req.transactions.is_empty() {
            if req.drain_mempool {
                None
            } else {
                Some(Vec::new())
            }
        } else {
            let mut decoded = Vec::with_capacity(req.transactions.len());
            for raw in &req.transactions {
                decoded.push(
                    from_bytes_canonical::<Transaction>(raw)
                        .map_err(|e| Status::invalid_argument(e.to_string()))?,
                );
            }
            Some(decoded)
        };
        let block = self.node.create_block(txs).await.map_err(status_from)?;
        Ok(Response::new(CreateBlockResponse {
            block: to_bytes_canonical(&block),
        }))
    }

    async fn commit_block(
        &self,
        request: Request<CommitBlockRequest>,
    ) -> Result<Response<CommitBlockResponse>, Status> {
        self.authenticate(&request)?;
        let req = request.into_inner();
        let block: Block =
            from_bytes_canonical(&req.block).map_err(|e| Status::invalid_argument(e.to_string()))?;
        let height = block.header.height;
        let block_hash = block.hash();
        self.node.commit_block(block).await.map_err(status_from)?;
        Ok(Response::new(CommitBlockResponse {
            height,
            block_hash: hex::encode(block_hash),
        }))
    }

    async fn get_block_by_height(
        &self,
        request: Request<GetBlockByHeightRequest>,
    ) -> Result<Response<GetBlockByHeightResponse>, Status> {
        self.authenticate(&request)?;
        let height = request.into_inner().height;
        let block = self
            .node
            .block_by_height(height)
            .await
            .map_err(status_from)?;
        Ok(Response::new(GetBlockByHeightResponse {
            block: to_bytes_canonical(&block),
        }))
    }

    async fn get_height(
        &self,
        request: Request<GetHeightRequest>,
    ) -> Result<Response<GetHeightResponse>, Status> {
        self.authenticate(&request)?;
        Ok(Response::new(GetHeightResponse {
            height: self.node.height().await,
        }))
    }

    async fn get_validator_set(
        &self,
        request: Request<GetValidatorSetRequest>,
    ) -> Result<Response<GetValidatorSetResponse>, Status> {
        self.authenticate(&request)?;
        let set = self.node.validator_set().await;
        let validators = set
            .iter()
            .map(|(addr, power)| Validator {
                address: addr.to_string(),
                power: power.to_string(),
            })
            .collect();
        Ok(Response::new(GetValidatorSetResponse { validators }))
    }

    async fn get_mempool(
        &self,
        request: Request<GetMempoolRequest>,
    ) -> Result<Response<GetMempoolResponse>, Status> {
        self.authenticate(&request)?;
        let transactions = self
            .node
            .mempool_snapshot()
            .await
            .iter()
            .map(to_bytes_canonical)
            .collect();
        Ok(Response::new(GetMempoolResponse { transactions }))
    }

    async fn get_last_commit_hash(
        &self,
        request: Request<GetLastCommitHashRequest>,
    ) -> Result<Response<GetLastCommitHashResponse>, Status> {
        self.authenticate(&request)?;
        Ok(Response::new(GetLastCommitHashResponse {
            hash: hex::encode(self.node.last_commit_hash().await),
        }))
    }

    async fn get_status(
        &self,
        request: Request<GetStatusRequest>,
    ) -> Result<Response<GetStatusResponse>, Status> {
        self.authenticate(&request)?;
        let status = self.node.status().await;
        Ok(Response::new(GetStatusResponse {
            height: status.height,
            latest_timestamp: status.latest_timestamp,
            total_transactions: status.total_transactions,
        }))
    }
}

#[tonic::async_trait]
impl QueryService for RpcContext {
    async fn query_state(
        &self,
        request: Request<QueryStateRequest>,
    ) -> Result<Response<QueryStateResponse>, Status> {
        self.authenticate(&request)?;
        let req = request.into_inner();
        let value = self
            .node
            .query_state(&req.namespace, &req.key)
            .await
            .map_err(status_from)?;
        Ok(Response::new(match value {
            Some(value) => QueryStateResponse { value, found: true },
            None => QueryStateResponse {
                value: Vec::new(),
                found: false,
            },
        }))
    }

    type QueryPrefixStream = ReceiverStream<Result<QueryPrefixEntry, Status>>;

    async fn query_prefix(
        &self,
        request: Request<QueryPrefixRequest>,
    ) -> Result<Response<Self::QueryPrefixStream>, Status> {
        self.authenticate(&request)?;
        let req = request.into_inner();
        let pairs = self
            .node
            .query_prefix(&req.namespace, &req.prefix)
            .await
            .map_err(status_from)?;
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for (key, value) in pairs {
                if tx.send(Ok(QueryPrefixEntry { key, value })).await.is_err() {
                    break;
                }
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn simulate_tx(
        &self,
        request: Request<SimulateTxRequest>,
    ) -> Result<Response<SimulateTxResponse>, Status> {
        self.authenticate(&request)?;
        let req = request.into_inner();
        let result = self
            .node
            .simulate(&req.transaction)
            .await
            .map_err(status_from)?;
        Ok(Response::new(SimulateTxResponse {
            gas_used: result.gas_used,
            gas_cost: result.gas_cost,
            events: result
                .events
                .into_iter()
                .map(|(kind, attributes)| Event {
                    kind,
                    attributes: attributes
                        .into_iter()
                        .map(|(key, value)| EventAttribute { key, value })
                        .collect(),
                })
                .collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nhb_ipc::auth::TokenAuthenticator;
    use nhb_types::error::BlockError;

    #[test]
    fn error_kinds_map_to_status_codes() {
        use tonic::Code;
        let cases: Vec<(NodeError, Code)> = vec![
            (NodeError::NotFound("block".into()), Code::NotFound),
            (NodeError::MempoolFull, Code::ResourceExhausted),
            (
                NodeError::Tx(TxError::Paused(nhb_types::tx::Module::Swap)),
                Code::Unavailable,
            ),
            (
                NodeError::Tx(TxError::EmissionCapExceeded {
                    token: "NHB".into(),
                }),
                Code::ResourceExhausted,
            ),
            (
                NodeError::Tx(TxError::RoleMissing("MINTER_NHB".into())),
                Code::PermissionDenied,
            ),
            (NodeError::Tx(TxError::InvalidSignature), Code::InvalidArgument),
            (
                NodeError::Block(BlockError::Invalid("bad".into())),
                Code::InvalidArgument,
            ),
            (NodeError::Internal("boom".into()), Code::Internal),
        ];
        for (err, code) in cases {
            assert_eq!(status_from(err).code(), code);
        }
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let status = status_from(NodeError::Internal("secret path /x".into()));
        assert_eq!(status.message(), "internal error");
    }

    #[test]
    fn auth_chain_is_built_from_parts() {
        let chain = AuthChain::new(vec![Box::new(TokenAuthenticator::new(
            "authorization",
            "tok",
        ))]);
        assert!(!chain.is_empty());
    }
}
