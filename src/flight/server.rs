//! Flight Gateway Server
//!
//! Implements `FlightService` on top of a [`FlightBackend`] + [`WriteBackend`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Flight client                            │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼ Arrow Flight (gRPC)
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      FlightGateway                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Handshake(secret)   → session token                            │
//! │  GetFlightInfo(path) → schema + one ticketed endpoint           │
//! │  DoGet(ticket)       → table batches, schema first              │
//! │  DoPut(stream)       → backend ingest, app_metadata acks        │
//! │  DoAction(action)    → MigrateTable / DeleteRecord / DeleteStale│
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Descriptors
//!
//! Tables are addressed by a three segment path, `cloudquery/arrowflight/<table>`.
//! Only the last segment is interpreted.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use arrow_flight::{
    flight_service_server::{FlightService, FlightServiceServer},
    Action, ActionType, Criteria, Empty, FlightData, FlightDescriptor, FlightEndpoint, FlightInfo,
    HandshakeRequest, HandshakeResponse, PollInfo, PutResult, SchemaAsIpc, SchemaResult, Ticket,
};
use arrow_ipc::writer::IpcWriteOptions;
use bytes::Bytes;
use futures::{stream, Stream};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::info;

use super::actions::{ActionDispatcher, ActionKind};
use super::auth::{AuthGate, AUTHORIZATION_HEADER};
use super::backend::{FlightBackend, Table, WriteBackend};
use super::streams::{ingest_stream, stream_table, table_descriptor};
use super::tickets::TicketCache;
use crate::config::{ServerConfig, TICKET_SWEEP_PERIOD};
use crate::{Error, Result};

/// Stream type for tonic responses
type TonicStream<T> = Pin<Box<dyn Stream<Item = std::result::Result<T, Status>> + Send + 'static>>;

// =============================================================================
// FLIGHT SERVICE
// =============================================================================

pub struct FlightGateway<B> {
    backend: Arc<B>,
    tickets: Arc<TicketCache>,
    auth: Arc<AuthGate>,
    actions: ActionDispatcher<B>,
}

impl<B: FlightBackend + WriteBackend> FlightGateway<B> {
    /// Create a gateway with default ticket TTL and the given handshake secret
    pub fn new(backend: B, auth_token: impl Into<String>) -> Self {
        Self::with_parts(
            Arc::new(backend),
            Arc::new(AuthGate::new(auth_token)),
            Arc::new(TicketCache::new()),
        )
    }

    pub fn from_config(config: &ServerConfig, backend: B) -> Self {
        Self::with_parts(
            Arc::new(backend),
            Arc::new(AuthGate::new(config.auth_token.clone())),
            Arc::new(TicketCache::with_ttl(config.ticket_ttl)),
        )
    }

    /// Create a gateway over shared state
    pub fn with_parts(backend: Arc<B>, auth: Arc<AuthGate>, tickets: Arc<TicketCache>) -> Self {
        let actions = ActionDispatcher::new(Arc::clone(&backend));
        Self {
            backend,
            tickets,
            auth,
            actions,
        }
    }

    pub fn tickets(&self) -> &Arc<TicketCache> {
        &self.tickets
    }

    pub fn auth(&self) -> &Arc<AuthGate> {
        &self.auth
    }

    fn authorize<T>(&self, request: &Request<T>) -> Result<()> {
        self.auth.authorize(request.metadata())
    }

    async fn resolve_table(&self, table_name: &str) -> Result<Table> {
        self.backend.lookup_table(table_name).await.map_err(|e| Error::TableNotFound {
            table: table_name.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Table name from a `ns/ns/<table>` descriptor path
fn table_name_from_path(descriptor: &FlightDescriptor) -> Result<&str> {
    match descriptor.path.as_slice() {
        [_, _, table_name] => Ok(table_name.as_str()),
        path => Err(Error::InvalidPath(path.len())),
    }
}

#[tonic::async_trait]
impl<B: FlightBackend + WriteBackend> FlightService for FlightGateway<B> {
    type HandshakeStream = TonicStream<HandshakeResponse>;
    type ListFlightsStream = TonicStream<FlightInfo>;
    type DoGetStream = TonicStream<FlightData>;
    type DoPutStream = TonicStream<PutResult>;
    type DoActionStream = TonicStream<arrow_flight::Result>;
    type ListActionsStream = TonicStream<ActionType>;
    type DoExchangeStream = TonicStream<FlightData>;

    /// Handshake - exchange the shared secret for a session token
    async fn handshake(
        &self,
        request: Request<Streaming<HandshakeRequest>>,
    ) -> std::result::Result<Response<Self::HandshakeStream>, Status> {
        let token = self.auth.authenticate(request.into_inner()).await?;

        let bearer: MetadataValue<Ascii> = format!("Bearer {token}")
            .parse()
            .map_err(|_| Status::internal("session token is not a valid header value"))?;
        let reply = HandshakeResponse {
            protocol_version: 0,
            payload: Bytes::from(token),
        };

        let output = stream::once(async { Ok(reply) });
        let mut response = Response::new(Box::pin(output) as Self::HandshakeStream);
        response.metadata_mut().insert(AUTHORIZATION_HEADER, bearer);
        Ok(response)
    }

    async fn list_flights(
        &self,
        _request: Request<Criteria>,
    ) -> std::result::Result<Response<Self::ListFlightsStream>, Status> {
        Err(Status::unimplemented("list_flights not implemented"))
    }

    /// GetFlightInfo - resolve a table and mint a ticket for it
    async fn get_flight_info(
        &self,
        request: Request<FlightDescriptor>,
    ) -> std::result::Result<Response<FlightInfo>, Status> {
        self.authorize(&request)?;
        let descriptor = request.into_inner();
        let table_name = table_name_from_path(&descriptor)?;
        info!(table = table_name, "GetFlightInfo");

        let table = self.resolve_table(table_name).await?;
        let (ticket, expiry) = self.tickets.issue(&table.name);
        let endpoint = FlightEndpoint {
            expiration_time: Some(prost_types::Timestamp::from(expiry)),
            ..FlightEndpoint::new().with_ticket(ticket)
        };

        let info = FlightInfo::new()
            .try_with_schema(&table.schema)
            .map_err(Error::from)?
            .with_descriptor(descriptor)
            .with_endpoint(endpoint)
            .with_total_records(-1)
            .with_total_bytes(-1)
            .with_ordered(true);

        Ok(Response::new(info))
    }

    async fn poll_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> std::result::Result<Response<PollInfo>, Status> {
        Err(Status::unimplemented("poll_flight_info not implemented"))
    }

    async fn get_schema(
        &self,
        request: Request<FlightDescriptor>,
    ) -> std::result::Result<Response<SchemaResult>, Status> {
        self.authorize(&request)?;
        let descriptor = request.into_inner();
        let table = self.resolve_table(table_name_from_path(&descriptor)?).await?;

        let options = IpcWriteOptions::default();
        let schema_result = SchemaAsIpc::new(&table.schema, &options)
            .try_into()
            .map_err(|e: arrow_schema::ArrowError| Status::from(Error::from(e)))?;

        Ok(Response::new(schema_result))
    }

    /// DoGet - redeem a ticket and stream the table
    async fn do_get(
        &self,
        request: Request<Ticket>,
    ) -> std::result::Result<Response<Self::DoGetStream>, Status> {
        self.authorize(&request)?;
        let ticket = request.into_inner();
        let table_name = self.tickets.redeem(&ticket.ticket)?;
        info!(table = %table_name, "DoGet");

        let table = self.resolve_table(&table_name).await?;
        let descriptor = table_descriptor(&table.name);
        let output = stream_table(Arc::clone(&self.backend), table, descriptor);
        Ok(Response::new(Box::pin(output)))
    }

    /// DoPut - ingest client batches
    async fn do_put(
        &self,
        request: Request<Streaming<FlightData>>,
    ) -> std::result::Result<Response<Self::DoPutStream>, Status> {
        self.authorize(&request)?;
        info!("DoPut");

        let output = ingest_stream(Arc::clone(&self.backend), request.into_inner());
        Ok(Response::new(Box::pin(output)))
    }

    /// DoAction - run a write action
    async fn do_action(
        &self,
        request: Request<Action>,
    ) -> std::result::Result<Response<Self::DoActionStream>, Status> {
        self.authorize(&request)?;
        let action = request.into_inner();
        info!(action = %action.r#type, "DoAction");

        let body = self.actions.dispatch(&action.r#type, &action.body).await?;

        let output = stream::once(async { Ok(arrow_flight::Result { body }) });
        Ok(Response::new(Box::pin(output)))
    }

    async fn list_actions(
        &self,
        request: Request<Empty>,
    ) -> std::result::Result<Response<Self::ListActionsStream>, Status> {
        self.authorize(&request)?;
        let output = stream::iter(ActionKind::action_types().into_iter().map(Ok::<_, Status>));
        Ok(Response::new(Box::pin(output)))
    }

    async fn do_exchange(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> std::result::Result<Response<Self::DoExchangeStream>, Status> {
        Err(Status::unimplemented("do_exchange not implemented"))
    }
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Bind `config.host:config.port` and serve until `shutdown` resolves.
pub async fn serve<B, F>(config: ServerConfig, backend: B, shutdown: F) -> Result<()>
where
    B: FlightBackend + WriteBackend,
    F: Future<Output = ()> + Send,
{
    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    serve_with_listener(config, backend, listener, shutdown).await
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve_with_listener<B, F>(
    config: ServerConfig,
    backend: B,
    listener: TcpListener,
    shutdown: F,
) -> Result<()>
where
    B: FlightBackend + WriteBackend,
    F: Future<Output = ()> + Send,
{
    let gateway = FlightGateway::from_config(&config, backend);
    let sweeper = gateway.tickets().spawn_sweeper(TICKET_SWEEP_PERIOD);

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Serving flight server");
    }

    let service =
        FlightServiceServer::new(gateway).max_decoding_message_size(config.max_message_size);
    let served = Server::builder()
        .add_service(service)
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await;

    sweeper.abort();
    info!("flight server stopped");
    served.map_err(Error::from)
}
