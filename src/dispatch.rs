//! Frame dispatch. The hosting process parses frames off the wire and
//! hands them here together with the sending client; whatever comes back
//! goes out on that client's connection.

use serde::Serialize;

use crate::{
    auth,
    broker::Broker,
    client::Client,
    protocol::{
        headers, operations, results, EntityName, Message, MessageKind,
    },
    queue::{PullResult, PushResult, Queue, QueueInfo},
    router::{BindingDefinition, RouteMethod, RouterDefinition, RouterPublishResult},
};

fn error_code(error: &crate::Error) -> u16 {
    use crate::error::ErrorKind::*;
    match error.kind {
        Duplicate => results::DUPLICATE,
        NotFound | Destroyed => results::NOT_FOUND,
        LimitExceeded => results::LIMIT_EXCEEDED,
        Unauthorized => results::UNAUTHORIZED,
        InvalidName => results::BAD_REQUEST,
        _ => results::INTERNAL,
    }
}

fn respond(request: &Message, code: u16) -> Option<Message> {
    Some(Message::response(request, code))
}

fn respond_json<T: Serialize>(request: &Message, value: &T) -> Option<Message> {
    let mut response = Message::response(request, results::OK);
    match serde_json::to_vec(value) {
        Ok(json) => {
            response.payload = json.into();
            Some(response)
        }
        Err(e) => {
            tracing::warn!(error = %e, "response payload encoding failed");
            Some(Message::response(request, results::INTERNAL))
        }
    }
}

/// Respond only when the producer said it is waiting.
fn maybe_respond(request: &Message, code: u16) -> Option<Message> {
    request
        .wait_response
        .then(|| Message::response(request, code))
}

impl Broker {
    /// Route one inbound frame. The return value, if any, is the frame to
    /// send back to `client`.
    #[tracing::instrument(skip_all, fields(kind = ?message.kind, target = %message.target))]
    pub async fn dispatch(&self, client: &Client, message: Message) -> Option<Message> {
        match message.kind {
            MessageKind::Ping => {
                let mut pong = Message::new(MessageKind::Pong, "", bytes::Bytes::new());
                pong.id = message.id;
                Some(pong)
            }
            MessageKind::Pong => None,
            MessageKind::QueueMessage => self.dispatch_queue_push(client, message).await,
            MessageKind::Acknowledge => {
                if let Ok(name) = EntityName::new(&message.target) {
                    if let Some(queue) = self.get_queue(&name) {
                        queue.acknowledge_delivered(client, message).await;
                    }
                }
                None
            }
            MessageKind::DirectMessage => self.dispatch_direct(client, message).await,
            MessageKind::Response => {
                // responses route back to whoever is waiting, verbatim
                if let Some(receiver) = self.get_client(&message.target) {
                    receiver.send(&message).await;
                }
                None
            }
            MessageKind::RouterPublish => self.dispatch_router_publish(client, message).await,
            MessageKind::ChannelPublish => self.dispatch_channel_publish(client, message).await,
            MessageKind::Pull => self.dispatch_pull(client, message).await,
            MessageKind::Event => None,
            MessageKind::Operation => self.dispatch_operation(client, message).await,
        }
    }

    async fn authorize_admin(&self, client: &Client, request: &Message) -> bool {
        auth::allow_all(&self.config().admin_authorization, client, request).await
    }
    async fn authorize_client(&self, client: &Client, request: &Message) -> bool {
        auth::allow_all(&self.config().client_authorization, client, request).await
    }

    async fn dispatch_queue_push(&self, client: &Client, message: Message) -> Option<Message> {
        let Ok(name) = EntityName::new(&message.target) else {
            return maybe_respond(&message, results::BAD_REQUEST);
        };
        if !self.authorize_client(client, &message).await {
            return maybe_respond(&message, results::UNAUTHORIZED);
        }
        let Some(queue) = self.get_or_create_queue(&name).await else {
            return maybe_respond(&message, results::NOT_FOUND);
        };
        match queue.push(message.clone(), Some(client)).await {
            // positive confirmation rides the ack decision path
            PushResult::Success | PushResult::NoConsumers | PushResult::Empty => None,
            PushResult::StatusNotSupported => {
                maybe_respond(&message, results::STATUS_NOT_SUPPORTED)
            }
            PushResult::LimitExceeded => maybe_respond(&message, results::LIMIT_EXCEEDED),
            PushResult::Error => maybe_respond(&message, results::INTERNAL),
        }
    }

    async fn dispatch_direct(&self, client: &Client, message: Message) -> Option<Message> {
        let Some(receiver) = self.get_client(&message.target) else {
            return maybe_respond(&message, results::NOT_FOUND);
        };
        if !self.authorize_client(client, &message).await {
            return maybe_respond(&message, results::UNAUTHORIZED);
        }
        if receiver.send(&message).await {
            None
        } else {
            maybe_respond(&message, results::FAILED)
        }
    }

    async fn dispatch_router_publish(&self, client: &Client, message: Message) -> Option<Message> {
        let Ok(name) = EntityName::new(&message.target) else {
            return maybe_respond(&message, results::BAD_REQUEST);
        };
        if !self.authorize_client(client, &message).await {
            return maybe_respond(&message, results::UNAUTHORIZED);
        }
        let Some(router) = self.get_router(&name) else {
            return maybe_respond(&message, results::NOT_FOUND);
        };
        match router.publish(Some(client), message.clone()).await {
            RouterPublishResult::Disabled => maybe_respond(&message, results::DISABLED),
            RouterPublishResult::NoBindings => maybe_respond(&message, results::NO_BINDINGS),
            RouterPublishResult::NoReceivers => maybe_respond(&message, results::NO_RECEIVERS),
            // a receiver will respond; stay quiet
            RouterPublishResult::OkAndWillRespond => None,
            RouterPublishResult::OkNoRespond => maybe_respond(&message, results::OK),
        }
    }

    async fn dispatch_channel_publish(&self, client: &Client, message: Message) -> Option<Message> {
        let Ok(name) = EntityName::new(&message.target) else {
            return maybe_respond(&message, results::BAD_REQUEST);
        };
        if !self.authorize_client(client, &message).await {
            return maybe_respond(&message, results::UNAUTHORIZED);
        }
        let Some(channel) = self.get_or_create_channel(&name).await else {
            return maybe_respond(&message, results::NOT_FOUND);
        };
        match channel.push(message.clone()).await {
            PushResult::Success => maybe_respond(&message, results::OK),
            PushResult::StatusNotSupported => {
                maybe_respond(&message, results::STATUS_NOT_SUPPORTED)
            }
            PushResult::LimitExceeded => maybe_respond(&message, results::LIMIT_EXCEEDED),
            _ => maybe_respond(&message, results::INTERNAL),
        }
    }

    async fn dispatch_pull(&self, client: &Client, message: Message) -> Option<Message> {
        let Ok(name) = EntityName::new(&message.target) else {
            return respond(&message, results::BAD_REQUEST);
        };
        if !self.authorize_client(client, &message).await {
            return respond(&message, results::UNAUTHORIZED);
        }
        let Some(queue) = self.get_queue(&name) else {
            return respond(&message, results::NOT_FOUND);
        };
        match queue.pull(client, &message).await {
            // the batch and its terminator were streamed already
            PullResult::Accepted(_) | PullResult::Empty => None,
            PullResult::StatusNotSupported => respond(&message, results::STATUS_NOT_SUPPORTED),
            PullResult::Unacceptable => respond(&message, results::BAD_REQUEST),
        }
    }

    async fn dispatch_operation(&self, client: &Client, message: Message) -> Option<Message> {
        match message.content_type {
            operations::QUEUE_SUBSCRIBE => self.op_queue_subscribe(client, &message).await,
            operations::QUEUE_UNSUBSCRIBE => self.op_queue_unsubscribe(client, &message).await,
            operations::QUEUE_CREATE => self.op_queue_create(client, &message).await,
            operations::QUEUE_REMOVE => self.op_queue_remove(client, &message).await,
            operations::QUEUE_UPDATE => self.op_queue_update(client, &message).await,
            operations::QUEUE_CLEAR => self.op_queue_clear(client, &message).await,
            operations::QUEUE_LIST => self.op_queue_list(client, &message).await,
            operations::QUEUE_INFO => self.op_queue_info(client, &message).await,
            operations::ROUTER_CREATE => self.op_router_create(client, &message).await,
            operations::ROUTER_REMOVE => self.op_router_remove(client, &message).await,
            operations::ROUTER_LIST => self.op_router_list(client, &message).await,
            operations::BINDING_ADD => self.op_binding_add(client, &message).await,
            operations::BINDING_REMOVE => self.op_binding_remove(client, &message).await,
            operations::BINDING_LIST => self.op_binding_list(client, &message).await,
            operations::CHANNEL_SUBSCRIBE => self.op_channel_subscribe(client, &message).await,
            operations::CHANNEL_UNSUBSCRIBE => {
                self.op_channel_unsubscribe(client, &message).await
            }
            operations::CHANNEL_CREATE => self.op_channel_create(client, &message).await,
            operations::CHANNEL_REMOVE => self.op_channel_remove(client, &message).await,
            operations::CHANNEL_LIST => self.op_channel_list(client, &message).await,
            unknown => {
                tracing::debug!(content_type = unknown, "unknown operation");
                respond(&message, results::BAD_REQUEST)
            }
        }
    }

    // ------------------------------------------------------------------
    // queue operations
    // ------------------------------------------------------------------

    async fn op_queue_subscribe(&self, client: &Client, request: &Message) -> Option<Message> {
        let Ok(name) = EntityName::new(&request.target) else {
            return respond(request, results::BAD_REQUEST);
        };
        if !self.authorize_client(client, request).await {
            return respond(request, results::UNAUTHORIZED);
        }
        let Some(queue) = self.get_or_create_queue(&name).await else {
            return respond(request, results::NOT_FOUND);
        };
        match queue.subscribe(client).await {
            Ok(_) => respond(request, results::OK),
            Err(e) => respond(request, error_code(&e)),
        }
    }

    async fn op_queue_unsubscribe(&self, client: &Client, request: &Message) -> Option<Message> {
        if request.target == "*" {
            for subscription in client.queue_subscription_snapshot() {
                if let Some(queue) = subscription.queue() {
                    queue.remove_client(client).await;
                }
            }
            return respond(request, results::OK);
        }
        let Ok(name) = EntityName::new(&request.target) else {
            return respond(request, results::BAD_REQUEST);
        };
        let Some(queue) = self.get_queue(&name) else {
            return respond(request, results::NOT_FOUND);
        };
        queue.remove_client(client).await;
        respond(request, results::OK)
    }

    async fn op_queue_create(&self, client: &Client, request: &Message) -> Option<Message> {
        if !self.authorize_admin(client, request).await {
            return respond(request, results::UNAUTHORIZED);
        }
        let Ok(name) = EntityName::new(&request.target) else {
            return respond(request, results::BAD_REQUEST);
        };
        let mut options = self.config().default_queue_options.clone();
        options.apply_headers(&request.headers);
        match self.create_queue(name, options) {
            Ok(queue) => {
                if let Err(e) = queue.initialize(Some(request)).await {
                    tracing::warn!(error = %e, "created queue failed to initialize");
                }
                respond(request, results::OK)
            }
            Err(e) => respond(request, error_code(&e)),
        }
    }

    async fn op_queue_remove(&self, client: &Client, request: &Message) -> Option<Message> {
        if !self.authorize_admin(client, request).await {
            return respond(request, results::UNAUTHORIZED);
        }
        let Ok(name) = EntityName::new(&request.target) else {
            return respond(request, results::BAD_REQUEST);
        };
        if self.remove_queue(&name).await {
            respond(request, results::OK)
        } else {
            respond(request, results::NOT_FOUND)
        }
    }

    async fn op_queue_update(&self, client: &Client, request: &Message) -> Option<Message> {
        if !self.authorize_admin(client, request).await {
            return respond(request, results::UNAUTHORIZED);
        }
        let Ok(name) = EntityName::new(&request.target) else {
            return respond(request, results::BAD_REQUEST);
        };
        let Some(queue) = self.get_queue(&name) else {
            return respond(request, results::NOT_FOUND);
        };
        queue.update_options(&request.headers);
        self.notify_queue_updated(&name).await;
        respond(request, results::OK)
    }

    async fn op_queue_clear(&self, client: &Client, request: &Message) -> Option<Message> {
        if !self.authorize_admin(client, request).await {
            return respond(request, results::UNAUTHORIZED);
        }
        let Ok(name) = EntityName::new(&request.target) else {
            return respond(request, results::BAD_REQUEST);
        };
        let Some(queue) = self.get_queue(&name) else {
            return respond(request, results::NOT_FOUND);
        };
        let yes = |header: &str| {
            request
                .headers
                .get(header)
                .is_some_and(|v| v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("true"))
        };
        let clear_priority = yes(headers::CLEAR_PRIORITY);
        let clear_regular = yes(headers::CLEAR_MESSAGES);
        let cleared = match (clear_priority, clear_regular) {
            (true, true) => queue.store().clear_all(),
            (true, false) => queue.store().clear_priority(),
            (false, true) => queue.store().clear_regular(),
            (false, false) => 0,
        };
        let mut response = Message::response(request, results::OK);
        response
            .headers
            .insert(headers::COUNT, cleared.to_string());
        Some(response)
    }

    async fn op_queue_list(&self, client: &Client, request: &Message) -> Option<Message> {
        if !self.authorize_client(client, request).await {
            return respond(request, results::UNAUTHORIZED);
        }
        let filter = request.headers.get(headers::FILTER).unwrap_or("*");
        let infos: Vec<QueueInfo> = self
            .queue_list()
            .iter()
            .filter(|q| crate::util::glob_match(filter, q.name().as_str()))
            .map(Queue::info)
            .collect();
        respond_json(request, &infos)
    }

    async fn op_queue_info(&self, client: &Client, request: &Message) -> Option<Message> {
        if !self.authorize_client(client, request).await {
            return respond(request, results::UNAUTHORIZED);
        }
        let Ok(name) = EntityName::new(&request.target) else {
            return respond(request, results::BAD_REQUEST);
        };
        let Some(queue) = self.get_queue(&name) else {
            return respond(request, results::NOT_FOUND);
        };
        respond_json(request, &queue.info())
    }

    // ------------------------------------------------------------------
    // router operations
    // ------------------------------------------------------------------

    async fn op_router_create(&self, client: &Client, request: &Message) -> Option<Message> {
        if !self.authorize_admin(client, request).await {
            return respond(request, results::UNAUTHORIZED);
        }
        let Ok(name) = EntityName::new(&request.target) else {
            return respond(request, results::BAD_REQUEST);
        };
        let method = request
            .headers
            .get(headers::ROUTE_METHOD)
            .and_then(RouteMethod::parse)
            .unwrap_or_default();
        match self.create_router(name, method) {
            Ok(_) => respond(request, results::OK),
            Err(e) => respond(request, error_code(&e)),
        }
    }

    async fn op_router_remove(&self, client: &Client, request: &Message) -> Option<Message> {
        if !self.authorize_admin(client, request).await {
            return respond(request, results::UNAUTHORIZED);
        }
        let Ok(name) = EntityName::new(&request.target) else {
            return respond(request, results::BAD_REQUEST);
        };
        if self.remove_router(&name) {
            respond(request, results::OK)
        } else {
            respond(request, results::NOT_FOUND)
        }
    }

    async fn op_router_list(&self, client: &Client, request: &Message) -> Option<Message> {
        if !self.authorize_client(client, request).await {
            return respond(request, results::UNAUTHORIZED);
        }
        let filter = request.headers.get(headers::FILTER).unwrap_or("*");
        let definitions: Vec<RouterDefinition> = self
            .router_list()
            .iter()
            .filter(|r| crate::util::glob_match(filter, r.name().as_str()))
            .map(crate::router::Router::definition)
            .collect();
        respond_json(request, &definitions)
    }

    async fn op_binding_add(&self, client: &Client, request: &Message) -> Option<Message> {
        if !self.authorize_admin(client, request).await {
            return respond(request, results::UNAUTHORIZED);
        }
        let Ok(name) = EntityName::new(&request.target) else {
            return respond(request, results::BAD_REQUEST);
        };
        let Some(router) = self.get_router(&name) else {
            return respond(request, results::NOT_FOUND);
        };
        let Ok(definition) = serde_json::from_slice::<BindingDefinition>(&request.payload) else {
            return respond(request, results::BAD_REQUEST);
        };
        match self.config().bindings.build(definition) {
            Some(Ok(binding)) => {
                if router.add_binding(binding) {
                    self.persist_topology();
                    self.events().trigger(
                        crate::broker::event::EventType::BindingAdded,
                        name.to_string(),
                        Vec::new(),
                    );
                    respond(request, results::OK)
                } else {
                    respond(request, results::DUPLICATE)
                }
            }
            Some(Err(e)) => respond(request, error_code(&e)),
            None => respond(request, results::BAD_REQUEST),
        }
    }

    async fn op_binding_remove(&self, client: &Client, request: &Message) -> Option<Message> {
        if !self.authorize_admin(client, request).await {
            return respond(request, results::UNAUTHORIZED);
        }
        let Ok(name) = EntityName::new(&request.target) else {
            return respond(request, results::BAD_REQUEST);
        };
        let Some(router) = self.get_router(&name) else {
            return respond(request, results::NOT_FOUND);
        };
        let Some(binding_name) = request.headers.get(headers::BINDING_NAME) else {
            return respond(request, results::BAD_REQUEST);
        };
        if router.remove_binding(binding_name) {
            self.persist_topology();
            self.events().trigger(
                crate::broker::event::EventType::BindingRemoved,
                name.to_string(),
                Vec::new(),
            );
            respond(request, results::OK)
        } else {
            respond(request, results::NOT_FOUND)
        }
    }

    async fn op_binding_list(&self, client: &Client, request: &Message) -> Option<Message> {
        if !self.authorize_client(client, request).await {
            return respond(request, results::UNAUTHORIZED);
        }
        let Ok(name) = EntityName::new(&request.target) else {
            return respond(request, results::BAD_REQUEST);
        };
        let Some(router) = self.get_router(&name) else {
            return respond(request, results::NOT_FOUND);
        };
        let definitions: Vec<BindingDefinition> = router
            .binding_snapshot()
            .iter()
            .map(|b| b.definition().clone())
            .collect();
        respond_json(request, &definitions)
    }

    // ------------------------------------------------------------------
    // channel operations
    // ------------------------------------------------------------------

    async fn op_channel_subscribe(&self, client: &Client, request: &Message) -> Option<Message> {
        let Ok(name) = EntityName::new(&request.target) else {
            return respond(request, results::BAD_REQUEST);
        };
        if !self.authorize_client(client, request).await {
            return respond(request, results::UNAUTHORIZED);
        }
        let Some(channel) = self.get_or_create_channel(&name).await else {
            return respond(request, results::NOT_FOUND);
        };
        match channel.subscribe(client).await {
            Ok(_) => respond(request, results::OK),
            Err(e) => respond(request, error_code(&e)),
        }
    }

    async fn op_channel_unsubscribe(&self, client: &Client, request: &Message) -> Option<Message> {
        if request.target == "*" {
            for subscription in client.channel_subscription_snapshot() {
                if let Some(channel) = subscription.channel() {
                    channel.remove_client(client).await;
                }
            }
            return respond(request, results::OK);
        }
        let Ok(name) = EntityName::new(&request.target) else {
            return respond(request, results::BAD_REQUEST);
        };
        let Some(channel) = self.get_channel(&name) else {
            return respond(request, results::NOT_FOUND);
        };
        channel.remove_client(client).await;
        respond(request, results::OK)
    }

    async fn op_channel_create(&self, client: &Client, request: &Message) -> Option<Message> {
        if !self.authorize_admin(client, request).await {
            return respond(request, results::UNAUTHORIZED);
        }
        let Ok(name) = EntityName::new(&request.target) else {
            return respond(request, results::BAD_REQUEST);
        };
        let mut options = self.config().default_channel_options.clone();
        options.apply_headers(&request.headers);
        match self.create_channel(name, options) {
            Ok(_) => respond(request, results::OK),
            Err(e) => respond(request, error_code(&e)),
        }
    }

    async fn op_channel_remove(&self, client: &Client, request: &Message) -> Option<Message> {
        if !self.authorize_admin(client, request).await {
            return respond(request, results::UNAUTHORIZED);
        }
        let Ok(name) = EntityName::new(&request.target) else {
            return respond(request, results::BAD_REQUEST);
        };
        if self.remove_channel(&name).await {
            respond(request, results::OK)
        } else {
            respond(request, results::NOT_FOUND)
        }
    }

    async fn op_channel_list(&self, client: &Client, request: &Message) -> Option<Message> {
        if !self.authorize_client(client, request).await {
            return respond(request, results::UNAUTHORIZED);
        }
        let filter = request.headers.get(headers::FILTER).unwrap_or("*");
        let infos: Vec<crate::channel::ChannelInfo> = self
            .channel_list()
            .iter()
            .filter(|c| crate::util::glob_match(filter, c.name().as_str()))
            .map(crate::channel::Channel::info)
            .collect();
        respond_json(request, &infos)
    }
}
