//! Status lines printed while deploying.
//!
//! These go to stdout and are meant for people; structured progress goes
//! through tracing instead.

use std::{
	fmt::Display,
	io::{self, ErrorKind, Write},
};

use kube::core::GroupVersionKind;

use crate::k8s::{apply::ApplyAction, endpoint::ServiceUrl};

/// A writer wrapper that silently handles broken pipe errors.
///
/// Lets `yaml-deploy | head -1` exit cleanly instead of failing the deploy
/// halfway because stdout went away.
pub struct BrokenPipeGuard<W> {
	inner: W,
}

impl<W> BrokenPipeGuard<W> {
	pub fn new(inner: W) -> Self {
		Self { inner }
	}
}

impl<W: Write> Write for BrokenPipeGuard<W> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		match self.inner.write(buf) {
			Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(buf.len()),
			other => other,
		}
	}

	fn flush(&mut self) -> io::Result<()> {
		match self.inner.flush() {
			Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
			other => other,
		}
	}
}

/// Writes the deploy progress in a fixed, line-oriented format.
pub struct StatusPrinter<W> {
	writer: W,
}

impl<W: Write> StatusPrinter<W> {
	pub fn new(writer: W) -> Self {
		Self { writer }
	}

	pub fn decoded(&mut self, gvk: &GroupVersionKind) -> io::Result<()> {
		writeln!(
			self.writer,
			"groupVersionKind.Group: {}, groupVersionKind.Kind: {}, groupVersionKind.Version: {}",
			gvk.group, gvk.kind, gvk.version
		)
	}

	/// `label` is the lowercase resource noun, e.g. "deployment".
	pub fn attempting(&mut self, action: ApplyAction, label: &str, name: &str) -> io::Result<()> {
		let verb = match action {
			ApplyAction::Created => "Create",
			ApplyAction::Updated => "Update",
		};
		writeln!(self.writer, "{verb} {label} {name:?}")
	}

	pub fn create_failed(&mut self, error: &dyn Display) -> io::Result<()> {
		writeln!(self.writer, "Info: {error}\n")
	}

	pub fn applied(&mut self, action: ApplyAction, label: &str, name: &str) -> io::Result<()> {
		let past = match action {
			ApplyAction::Created => "created",
			ApplyAction::Updated => "updated",
		};
		writeln!(self.writer, "{} {name:?} {past}\n", capitalize(label))
	}

	/// Left unterminated; the URL line that follows starts with its own newline.
	pub fn host_lookup_failed(&mut self, error: &dyn Display) -> io::Result<()> {
		write!(self.writer, "\nInfo: {error}")
	}

	pub fn url(&mut self, url: &ServiceUrl) -> io::Result<()> {
		if url.is_resolved() {
			writeln!(self.writer, "\nPlease view: {url}\n")
		} else {
			writeln!(self.writer, "\nPlease help yourself and view: {url}\n")
		}
	}

	pub fn into_inner(self) -> W {
		self.writer
	}
}

fn capitalize(s: &str) -> String {
	let mut chars = s.chars();
	match chars.next() {
		Some(first) => first.to_uppercase().chain(chars).collect(),
		None => String::new(),
	}
}
