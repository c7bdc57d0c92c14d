mod helpers;
mod webhooks;
