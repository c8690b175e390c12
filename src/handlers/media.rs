use super::Inbound;
use crate::disposition::{Disposition, RejectReason};
use crate::effects::SideEffects;
use crate::processor::MessageProcessor;
use ingestcore::jobs::Job;
use ingestcore::links;
use ingestcore::mime;
use ingestcore::store::{
    InsertResult, MentionRecord, MessageBody, MessageKey, MessageKind, NewAttachment, QuoteRecord,
    StickerLocator, StoreError, Transaction, TransferState,
};
use ingestcore::types::envelope::{Mention, Preview, Quote, QuotedAttachment, Sticker};
use ingestcore::types::{DataMessage, ServiceAddress};
use log::{debug, warn};

impl MessageProcessor {
    pub(crate) async fn handle_media_message(
        &self,
        txn: &mut dyn Transaction,
        fx: &mut SideEffects,
        inbound: Inbound<'_>,
        msg: &DataMessage,
    ) -> Result<Disposition, StoreError> {
        let conversation = self.conversation_for(txn, inbound, msg.group.as_ref()).await?;
        let content = match self.build_media_body(txn, msg, inbound.ts()).await? {
            Ok(content) => content,
            Err(reason) => return Ok(Disposition::RejectInvalid(reason)),
        };
        self.sync_expiration(txn, fx, inbound, msg, conversation).await?;

        let thread = txn.thread_for_recipient(conversation).await?;
        self.notify_typing_stopped(&*txn, fx, inbound, thread).await?;

        let pending = pending_downloads(&content);
        let view_once = content.view_once;
        match txn.insert_incoming(inbound.incoming(conversation, content)).await? {
            Some(inserted) => {
                self.delete_placeholder(txn, inbound).await?;
                schedule_downloads(fx, &inserted, &pending);
                fx.job(Job::TrimThread {
                    thread: inserted.thread_id,
                });
                if view_once {
                    fx.job(Job::ViewOnceCleanup);
                }
                fx.conversation_updated(inserted.thread_id);
                Ok(Disposition::Applied)
            }
            None => Ok(Disposition::Unchanged),
        }
    }

    /// Everything a media row stores, validated and resolved against local state.
    pub(crate) async fn build_media_body(
        &self,
        txn: &mut dyn Transaction,
        msg: &DataMessage,
        sent_timestamp: u64,
    ) -> Result<Result<MessageBody, RejectReason>, StoreError> {
        let quote = match &msg.quote {
            Some(quote) => match self.resolve_quote(txn, quote).await? {
                Some(record) => Some(record),
                None => return Ok(Err(RejectReason::MalformedQuote)),
            },
            None => None,
        };

        let mut attachments: Vec<NewAttachment> = msg.attachments.iter().map(NewAttachment::from_pointer).collect();
        if let Some(sticker) = &msg.sticker {
            match self.sticker_attachment(&*txn, sticker).await? {
                Some(attachment) => attachments.push(attachment),
                None => return Ok(Err(RejectReason::MalformedSticker)),
            }
        }

        let mut content = MessageBody::new(MessageKind::Media, sent_timestamp)
            .with_body(msg.body.clone())
            .expiring_in(u64::from(msg.expires_in_seconds) * 1000);
        content.view_once = msg.view_once;
        content.quote = quote;
        content.shared_contacts = msg.shared_contacts.clone();
        content.previews = valid_previews(&msg.previews, msg.body.as_deref());
        content.mentions = resolve_mentions(txn, &msg.mentions).await?;
        content.attachments = attachments;
        Ok(Ok(content))
    }

    /// `None` when the quote does not name a message.
    async fn resolve_quote(&self, txn: &mut dyn Transaction, quote: &Quote) -> Result<Option<QuoteRecord>, StoreError> {
        if quote.id == 0 || quote.author.is_empty() {
            warn!("Quote without id or author");
            return Ok(None);
        }
        let author = txn.get_or_create_recipient(&quote.author).await?;
        let target = txn.message_for(MessageKey::new(author, quote.id)).await?;

        let record = match target {
            Some(original) if !original.remote_deleted => {
                let attachments = if original.view_once {
                    vec![QuotedAttachment {
                        content_type: mime::VIEW_ONCE.to_string(),
                        file_name: None,
                        thumbnail: None,
                    }]
                } else {
                    original
                        .attachments
                        .iter()
                        .filter(|a| !a.quote)
                        .map(|a| QuotedAttachment {
                            content_type: a.content_type.clone(),
                            file_name: a.pointer.as_ref().and_then(|p| p.file_name.clone()),
                            thumbnail: a.pointer.clone(),
                        })
                        .collect()
                };
                QuoteRecord {
                    id: quote.id,
                    author,
                    text: original.body,
                    missing: false,
                    attachments,
                    mentions: original.mentions,
                }
            }
            _ => {
                debug!("Quoted message {author}@{} not found locally", quote.id);
                QuoteRecord {
                    id: quote.id,
                    author,
                    text: quote.text.clone(),
                    missing: true,
                    attachments: quote.attachments.clone(),
                    mentions: resolve_mentions(txn, &quote.mentions).await?,
                }
            }
        };
        Ok(Some(record))
    }

    /// `None` when the sticker is missing its pack or its image.
    async fn sticker_attachment(
        &self,
        txn: &dyn Transaction,
        sticker: &Sticker,
    ) -> Result<Option<NewAttachment>, StoreError> {
        let (Some(pack_id), Some(pack_key), Some(pointer)) = (&sticker.pack_id, &sticker.pack_key, &sticker.attachment)
        else {
            warn!("Malformed sticker");
            return Ok(None);
        };
        let locator = StickerLocator {
            pack_id: hex::encode(pack_id),
            pack_key: hex::encode(pack_key),
            sticker_id: sticker.sticker_id,
            emoji: sticker.emoji.clone(),
        };

        if let Some(local) = txn.sticker(&locator.pack_id, locator.sticker_id).await? {
            return Ok(Some(NewAttachment {
                pointer: None,
                content_type: mime::IMAGE_WEBP.to_string(),
                transfer: TransferState::Done,
                sticker: Some(locator),
                local_uri: Some(local.uri),
                quote: false,
            }));
        }

        let mut attachment = NewAttachment::from_pointer(pointer);
        attachment.sticker = Some(locator);
        Ok(Some(attachment))
    }
}

/// Previews that name a URL from the body, have a title and point at a
/// permitted domain.
pub(crate) fn valid_previews(previews: &[Preview], body: Option<&str>) -> Vec<Preview> {
    previews
        .iter()
        .filter(|p| p.title.as_deref().is_some_and(|t| !t.is_empty()))
        .filter(|p| links::is_valid_preview_url(&p.url) && links::body_contains_url(body, &p.url))
        .cloned()
        .collect()
}

pub(crate) async fn resolve_mentions(
    txn: &mut dyn Transaction,
    mentions: &[Mention],
) -> Result<Vec<MentionRecord>, StoreError> {
    let mut resolved = Vec::with_capacity(mentions.len());
    for mention in mentions.iter().filter(|m| !m.uuid.is_empty()) {
        let recipient = txn
            .get_or_create_recipient(&ServiceAddress::from_uuid(mention.uuid.as_str()))
            .await?;
        resolved.push(MentionRecord {
            recipient,
            start: mention.start,
            length: mention.length,
        });
    }
    Ok(resolved)
}

/// Per new attachment: (is a sticker, still needs downloading).
pub(crate) fn pending_downloads(content: &MessageBody) -> Vec<(bool, bool)> {
    content
        .attachments
        .iter()
        .map(|a| (a.sticker.is_some(), a.transfer == TransferState::Pending && a.pointer.is_some()))
        .collect()
}

/// Stickers are fetched inline within the budget; everything else is queued.
pub(crate) fn schedule_downloads(fx: &mut SideEffects, inserted: &InsertResult, pending: &[(bool, bool)]) {
    for (attachment_id, (sticker, needs_download)) in inserted.attachment_ids.iter().zip(pending) {
        if !needs_download {
            continue;
        }
        if *sticker {
            fx.download_sticker(inserted.message_id, *attachment_id);
        } else {
            fx.job(Job::AttachmentDownload {
                message_id: inserted.message_id,
                attachment_id: *attachment_id,
                forced: false,
            });
        }
    }
}
