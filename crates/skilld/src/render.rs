//! Prompt context assembly.
//!
//! The model sees two layers: a cheap index of every available skill
//! (name, description, location) and the full instructions of only the
//! skills disclosed so far, in disclosure order. Both render as one XML
//! block appended to the system context.

use crate::loader::SkillBody;
use skilld_core::skills::SkillDescriptor;
use std::sync::Arc;

/// Render the metadata index of every available skill.
///
/// Descriptions are always shown; bodies never are. An empty registry
/// renders nothing at all.
pub fn render_available_skills(skills: &[SkillDescriptor]) -> String {
    if skills.is_empty() {
        return String::new();
    }

    let entries: Vec<String> = skills
        .iter()
        .map(|s| {
            format!(
                "<skill>\n<name>{}</name>\n<description>{}</description>\n<location>{}</location>\n</skill>",
                escape_xml(&s.name),
                escape_xml(&s.description),
                s.location.as_str()
            )
        })
        .collect();

    format!(
        "<available_skills>\n\n{}\n\n</available_skills>",
        entries.join("\n\n")
    )
}

/// Render the instructions of disclosed skills, in disclosure order.
pub fn render_disclosed_skills(bodies: &[Arc<SkillBody>]) -> String {
    if bodies.is_empty() {
        return String::new();
    }

    let entries: Vec<String> = bodies
        .iter()
        .map(|b| {
            let mut entry = format!(
                "<skill name=\"{}\">\n<instructions>\n{}\n</instructions>",
                escape_xml(&b.name),
                b.instructions.trim()
            );
            if !b.examples.is_empty() {
                entry.push_str("\n<examples>\n");
                for example in &b.examples {
                    entry.push_str(&format!(
                        "<example>\n<user>{}</user>\n<action>{}</action>\n</example>\n",
                        escape_xml(&example.user),
                        escape_xml(&example.action)
                    ));
                }
                entry.push_str("</examples>");
            }
            entry.push_str("\n</skill>");
            entry
        })
        .collect();

    format!(
        "<disclosed_skills>\n\n{}\n\n</disclosed_skills>",
        entries.join("\n\n")
    )
}

/// Full skills context block for one turn.
pub fn render_context(available: &[SkillDescriptor], disclosed: &[Arc<SkillBody>]) -> String {
    let index = render_available_skills(available);
    let disclosed = render_disclosed_skills(disclosed);

    if index.is_empty() && disclosed.is_empty() {
        return String::new();
    }

    let mut block = String::from("<skills_system priority=\"1\">\n\n");
    block.push_str(
        "<usage>\nSkills listed in available_skills can be disclosed on demand. \
         Only skills under disclosed_skills are loaded into this context; \
         follow their instructions when relevant.\n</usage>\n\n",
    );
    if !index.is_empty() {
        block.push_str(&index);
        block.push_str("\n\n");
    }
    if !disclosed.is_empty() {
        block.push_str(&disclosed);
        block.push_str("\n\n");
    }
    block.push_str("</skills_system>");
    block
}

/// Escapes special XML characters in text.
fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
