// External collaborators: relational store and mail delivery

pub mod mailer;
pub mod postgres;
