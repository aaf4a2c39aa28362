// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::filter::{ForwardRule, PacketFilter};
use std::io;
use std::process::Command;
use tracing::debug;

const IPTABLES: &str = "iptables";
const IP6TABLES: &str = "ip6tables";
const IPSET: &str = "ipset";

/// Packet-filter backend driving iptables, ip6tables and ipset.
///
/// The chain holds one UDP accept rule per (peer network, port); the two
/// sets hold the member networks per address family.
pub struct IptablesFilter {
	chain: String,
	ipset_v4: String,
	ipset_v6: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
	V4,
	V6,
}

impl Family {
	fn tables(self) -> &'static str {
		match self {
			Family::V4 => IPTABLES,
			Family::V6 => IP6TABLES,
		}
	}

	fn ipset_family(self) -> &'static str {
		match self {
			Family::V4 => "inet",
			Family::V6 => "inet6",
		}
	}
}

fn args(parts: &[&str]) -> Vec<String> {
	parts.iter().map(|part| part.to_string()).collect()
}

fn rule_args(action: &str, chain: &str, net: &str, port: u16) -> Vec<String> {
	let port = port.to_string();
	args(&[
		action, chain, "-d", net, "-p", "udp", "--dport", &port, "-j", "ACCEPT",
	])
}

fn create_set_args(name: &str, family: Family) -> Vec<String> {
	args(&[
		"create",
		name,
		"hash:net",
		"family",
		family.ipset_family(),
		"-exist",
	])
}

impl IptablesFilter {
	pub fn new(chain: String, ipset_v4: String, ipset_v6: String) -> Self {
		Self {
			chain,
			ipset_v4,
			ipset_v6,
		}
	}

	fn run(program: &str, args: &[String]) -> io::Result<()> {
		debug!(%program, ?args, "running packet filter command");
		let output = Command::new(program).args(args).output()?;
		if !output.status.success() {
			return Err(io::Error::other(format!(
				"{} {} failed: {}",
				program,
				args.join(" "),
				String::from_utf8_lossy(&output.stderr).trim()
			)));
		}
		Ok(())
	}

	/// Runs a command for its exit status alone; spawn failures still
	/// surface as errors.
	fn probe(program: &str, args: &[String]) -> io::Result<bool> {
		let output = Command::new(program).args(args).output()?;
		Ok(output.status.success())
	}

	fn ensure_chain(&self, program: &str) -> io::Result<()> {
		if Self::probe(program, &args(&["-n", "-L", &self.chain]))? {
			return Ok(());
		}
		Self::run(program, &args(&["-N", &self.chain]))
	}

	fn set_for(&self, family: Family) -> &str {
		match family {
			Family::V4 => &self.ipset_v4,
			Family::V6 => &self.ipset_v6,
		}
	}

	fn add_member(&self, family: Family, net: &str) -> io::Result<()> {
		Self::run(IPSET, &args(&["add", self.set_for(family), net, "-exist"]))
	}

	fn del_member(&self, family: Family, net: &str) -> io::Result<()> {
		Self::run(IPSET, &args(&["del", self.set_for(family), net, "-exist"]))
	}

	fn append_rule(&self, family: Family, net: &str, port: u16) -> io::Result<()> {
		Self::run(family.tables(), &rule_args("-A", &self.chain, net, port))
	}

	fn rule_exists(&self, family: Family, net: &str, port: u16) -> io::Result<bool> {
		Self::probe(family.tables(), &rule_args("-C", &self.chain, net, port))
	}

	fn delete_rule(&self, family: Family, net: &str, port: u16) {
		// A missing rule is fine; removal is idempotent.
		if let Err(error) = Self::run(family.tables(), &rule_args("-D", &self.chain, net, port)) {
			debug!(%error, "skipping packet filter rule delete");
		}
	}
}

impl PacketFilter for IptablesFilter {
	fn init(&self) -> io::Result<()> {
		Self::run(IPSET, &create_set_args(&self.ipset_v4, Family::V4))?;
		Self::run(IPSET, &create_set_args(&self.ipset_v6, Family::V6))?;
		self.ensure_chain(IPTABLES)?;
		self.ensure_chain(IP6TABLES)?;
		Ok(())
	}

	fn resync(&self, rules: &[ForwardRule]) -> io::Result<()> {
		Self::run(IPSET, &args(&["flush", &self.ipset_v4]))?;
		Self::run(IPSET, &args(&["flush", &self.ipset_v6]))?;
		Self::run(IPTABLES, &args(&["-F", &self.chain]))?;
		Self::run(IP6TABLES, &args(&["-F", &self.chain]))?;

		for rule in rules {
			let ipv4 = rule.ipv4.to_string();
			let ipv6 = rule.ipv6.to_string();
			self.add_member(Family::V4, &ipv4)?;
			self.add_member(Family::V6, &ipv6)?;
			for port in &rule.ports {
				self.append_rule(Family::V4, &ipv4, *port)?;
				self.append_rule(Family::V6, &ipv6, *port)?;
			}
		}

		Ok(())
	}

	fn add(&self, rule: &ForwardRule) -> io::Result<()> {
		let ipv4 = rule.ipv4.to_string();
		let ipv6 = rule.ipv6.to_string();
		self.add_member(Family::V4, &ipv4)?;
		self.add_member(Family::V6, &ipv6)?;

		for port in &rule.ports {
			if !self.rule_exists(Family::V4, &ipv4, *port)? {
				self.append_rule(Family::V4, &ipv4, *port)?;
			}
			if !self.rule_exists(Family::V6, &ipv6, *port)? {
				self.append_rule(Family::V6, &ipv6, *port)?;
			}
		}

		Ok(())
	}

	fn remove(&self, rule: &ForwardRule) -> io::Result<()> {
		let ipv4 = rule.ipv4.to_string();
		let ipv6 = rule.ipv6.to_string();
		self.del_member(Family::V4, &ipv4)?;
		self.del_member(Family::V6, &ipv6)?;

		for port in &rule.ports {
			self.delete_rule(Family::V4, &ipv4, *port);
			self.delete_rule(Family::V6, &ipv6, *port);
		}

		Ok(())
	}
}
