//! Rendered bodies for the two messages the service sends.
//!
//! Both messages carry a plain-text part and an HTML part. User-supplied
//! content (exam names, notes, the sender's message) is escaped before it
//! reaches the HTML part.

use time::Date;

use crate::OutboundEmail;

/// One exam entry rendered inside a share notification.
#[derive(Debug, Clone)]
pub struct SharedExamSummary {
    pub name: String,
    pub exam_date: Option<Date>,
    pub notes: Option<String>,
}

/// Parameters for the "exams shared with you" notification.
#[derive(Debug)]
pub struct ShareInvitation<'a> {
    /// Full public URL of the share, `{base}/s/{code}`.
    pub share_url: &'a str,
    /// Optional personal message from the sender.
    pub message: Option<&'a str>,
    /// Day the link stops working.
    pub expires_on: Date,
    pub exams: &'a [SharedExamSummary],
}

/// The OTP challenge email. `exam_names` labels what the recipient asked
/// to access, typically the comma-joined exam names of the bundle.
pub fn verification_code_email(to: &str, code: &str, exam_names: &str) -> OutboundEmail {
    let subject = "Your Satchel verification code".to_string();

    let text = format!(
        r#"Verification code

You requested access to the shared exams: {exam_names}

Use the code below to verify your access:

{code}

This code expires in 10 minutes and allows at most 5 attempts.

If you did not request this code, you can ignore this email."#
    );

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>
body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
.container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
.code {{ background: #f4f4f4; padding: 20px; text-align: center; font-size: 32px; font-weight: bold; letter-spacing: 5px; margin: 20px 0; border-radius: 5px; }}
.warning {{ color: #d9534f; font-size: 14px; margin-top: 10px; }}
</style>
</head>
<body>
<div class="container">
<h2>Verification code</h2>
<p>You requested access to the shared exams: <strong>{exams}</strong></p>
<p>Use the code below to verify your access:</p>
<div class="code">{code}</div>
<p class="warning">This code expires in 10 minutes and allows at most 5 attempts.</p>
<p>If you did not request this code, you can ignore this email.</p>
</div>
</body>
</html>"#,
        exams = escape_html(exam_names),
        code = code,
    );

    OutboundEmail {
        to: to.to_string(),
        subject,
        text,
        html,
    }
}

/// The share notification sent to the recipient when a bundle is created.
pub fn share_invitation_email(to: &str, invitation: &ShareInvitation<'_>) -> OutboundEmail {
    let count = invitation.exams.len();
    let subject = match invitation.exams.first() {
        Some(first) if count == 1 => format!("Shared exam: {}", first.name),
        _ => format!("{count} exams shared with you"),
    };

    let text_exams = invitation
        .exams
        .iter()
        .enumerate()
        .map(|(i, exam)| {
            let mut entry = format!("{}. {}\n   Date: {}", i + 1, exam.name, date_label(exam));
            if let Some(notes) = &exam.notes {
                entry.push_str(&format!("\n   Notes: {notes}"));
            }
            entry
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let text_message = match invitation.message {
        Some(message) => format!("Message from the sender:\n{message}\n\n"),
        None => String::new(),
    };

    let text = format!(
        r#"Exams shared with you

{message}You have received a share of {count} exam{plural}:

{exams}

Open the exams through this link:
{url}

IMPORTANT: this link expires on {expires}.

If you were not expecting this email, you can ignore it."#,
        message = text_message,
        count = count,
        plural = if count == 1 { "" } else { "s" },
        exams = text_exams,
        url = invitation.share_url,
        expires = invitation.expires_on,
    );

    let html_exams = invitation
        .exams
        .iter()
        .map(|exam| {
            let notes = match &exam.notes {
                Some(notes) => format!(
                    "<p style=\"margin: 5px 0; color: #666;\"><strong>Notes:</strong> {}</p>",
                    escape_html(notes)
                ),
                None => String::new(),
            };
            format!(
                r#"<div style="margin-bottom: 20px; padding: 15px; background: #f9f9f9; border-left: 4px solid #007bff; border-radius: 4px;">
<h3 style="margin: 0 0 10px 0; color: #333;">{name}</h3>
<p style="margin: 5px 0; color: #666;"><strong>Date:</strong> {date}</p>
{notes}
</div>"#,
                name = escape_html(&exam.name),
                date = date_label(exam),
                notes = notes,
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let html_message = match invitation.message {
        Some(message) => format!(
            "<div class=\"info-box\"><p><strong>Message from the sender:</strong><br>{}</p></div>",
            escape_html(message)
        ),
        None => String::new(),
    };

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>
body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
.container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
.button {{ display: inline-block; padding: 12px 24px; background: #007bff; color: white; text-decoration: none; border-radius: 5px; margin: 20px 0; }}
.info-box {{ background: #e7f3ff; padding: 15px; border-radius: 5px; margin: 20px 0; }}
</style>
</head>
<body>
<div class="container">
<h2>Exams shared with you</h2>
{message}
<p>You have received a share of {count} exam{plural}.</p>
{exams}
<p style="margin-top: 30px;">Click the button below to open the exams:</p>
<a href="{url}" class="button" style="color: white; text-decoration: none;">Open exams</a>
<p style="margin-top: 20px; font-size: 14px; color: #666;">
Or copy and paste this link into your browser:<br>
<a href="{url}" style="color: #007bff; word-break: break-all;">{url}</a>
</p>
<p style="color: #d9534f; margin-top: 20px;"><strong>IMPORTANT:</strong> this link expires on {expires}.</p>
<p style="margin-top: 30px; font-size: 12px; color: #999;">
If you were not expecting this email, you can ignore it.
</p>
</div>
</body>
</html>"#,
        message = html_message,
        count = count,
        plural = if count == 1 { "" } else { "s" },
        exams = html_exams,
        url = escape_html(invitation.share_url),
        expires = invitation.expires_on,
    );

    OutboundEmail {
        to: to.to_string(),
        subject,
        text,
        html,
    }
}

fn date_label(exam: &SharedExamSummary) -> String {
    match exam.exam_date {
        Some(date) => date.to_string(),
        None => "not provided".to_string(),
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
