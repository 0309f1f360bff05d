//! services/composer_service.rs
//! Arma el mensaje final: headers, links reescritos y pixel de apertura.

use anyhow::{Context, Result};
use chrono::Utc;
use scraper::{Html, Node, Selector};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::db::db_timestamp;
use crate::models::campaign_model::{Campaign, SendingAccount};
use crate::models::recipient_model::Recipient;
use crate::models::sequence_model::MessageTemplate;
use crate::models::tracking_model::RenderedMessage;

/// Link reescrito: id del `link_clicks` y destino original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedLink {
    pub link_click_id: String,
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct ComposerService {
    db_pool: Pool<Sqlite>,
    tracking_base_url: String,
}

impl ComposerService {
    pub fn new(db_pool: Pool<Sqlite>, tracking_base_url: String) -> Self {
        Self {
            db_pool,
            tracking_base_url: tracking_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// No toca el transporte: solo persiste los link_clicks y devuelve el payload.
    pub async fn compose(
        &self,
        template: &MessageTemplate,
        recipient: &Recipient,
        campaign: &Campaign,
        account: &SendingAccount,
        send_record_id: &str,
    ) -> Result<RenderedMessage> {
        let from = account.mailbox()?;

        let base = &self.tracking_base_url;
        let (html, links) = rewrite_anchor_hrefs(&template.html_content, |_| {
            let link_click_id = Uuid::new_v4().to_string();
            let tracked = format!("{}/link/{}", base, link_click_id);
            (link_click_id, tracked)
        });

        self.insert_link_clicks(&links, &recipient.id, &template.id).await?;

        let pixel = tracking_pixel_tag(&self.tracking_base_url, send_record_id);

        Ok(RenderedMessage {
            from,
            to: recipient.email_address.clone(),
            reply_to: campaign.reply_to_email_address.clone(),
            subject: template.subject.clone(),
            html: append_tracking_pixel(&html, &pixel),
            // El texto plano va tal cual, sin reescritura de links
            text: template.text_content.clone(),
            link_click_ids: links.into_iter().map(|l| l.link_click_id).collect(),
        })
    }

    /// Todos los links del mensaje o ninguno.
    async fn insert_link_clicks(
        &self,
        links: &[TrackedLink],
        recipient_id: &str,
        template_id: &str,
    ) -> Result<()> {
        let now = db_timestamp(Utc::now());
        let mut tx = self
            .db_pool
            .begin()
            .await
            .context("Failed to open link click transaction")?;

        for link in links {
            sqlx::query(
                r#"
                INSERT INTO link_clicks (
                    id, url, recipient_email_id, email_template_id, click_count, created_at
                )
                VALUES (?1, ?2, ?3, ?4, 0, ?5)
                "#,
            )
            .bind(&link.link_click_id)
            .bind(&link.url)
            .bind(recipient_id)
            .bind(template_id)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .context("Failed to insert link click record")?;
        }

        tx.commit()
            .await
            .context("Failed to commit link click records")?;
        Ok(())
    }

    /// Borra los link_clicks de un mensaje que no llegó a enviarse.
    pub async fn discard_link_clicks(&self, link_click_ids: &[String]) -> Result<()> {
        for link_click_id in link_click_ids {
            sqlx::query("DELETE FROM link_clicks WHERE id = ?1 AND click_count = 0")
                .bind(link_click_id)
                .execute(&self.db_pool)
                .await
                .context("Failed to delete link click record")?;
        }
        Ok(())
    }
}

fn anchor_selector() -> Selector {
    Selector::parse("a[href]").expect("anchor selector")
}

/// Destinos de los `<a href>` del documento, en orden. Entidades decodificadas;
/// lo que está dentro de comentarios no cuenta.
pub fn find_anchor_hrefs(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&anchor_selector())
        .filter_map(|anchor| anchor.value().attr("href"))
        .map(str::to_string)
        .collect()
}

/// Parsea el HTML, cambia cada href por lo que devuelva `track` y serializa.
/// `track` recibe el destino original y devuelve `(link_click_id, url_nueva)`.
pub fn rewrite_anchor_hrefs<F>(html: &str, mut track: F) -> (String, Vec<TrackedLink>)
where
    F: FnMut(&str) -> (String, String),
{
    let mut document = Html::parse_document(html);
    let anchors: Vec<_> = document
        .select(&anchor_selector())
        .filter_map(|anchor| {
            anchor
                .value()
                .attr("href")
                .map(|href| (anchor.id(), href.to_string()))
        })
        .collect();

    let mut links = Vec::with_capacity(anchors.len());
    for (node_id, url) in anchors {
        let (link_click_id, tracked_url) = track(&url);
        if let Some(mut node) = document.tree.get_mut(node_id) {
            if let Node::Element(element) = node.value() {
                for (name, value) in element.attrs.iter_mut() {
                    if &*name.local == "href" {
                        value.clear();
                        value.push_slice(&tracked_url);
                    }
                }
            }
        }
        links.push(TrackedLink { link_click_id, url });
    }

    (document.html(), links)
}

pub fn tracking_pixel_tag(tracking_base_url: &str, send_record_id: &str) -> String {
    format!(
        r#"<img src="{}/newsletter-image/{}" width="1" height="1" alt="" style="border:0" />"#,
        tracking_base_url, send_record_id
    )
}

/// Inserta el pixel antes de `</body>` si existe; si no, lo concatena.
pub fn append_tracking_pixel(html: &str, pixel: &str) -> String {
    match html.to_ascii_lowercase().rfind("</body") {
        Some(idx) => format!("{}{}{}", &html[..idx], pixel, &html[idx..]),
        None => format!("{}{}", html, pixel),
    }
}
